//! Per-direction record reassembly.
//!
//! A [`RecordStream`] accumulates the reassembled bytes of one direction of
//! a flow and consumes whole records from the front. A record is never
//! consumed partially: an incomplete tail stays buffered until more data
//! arrives. Application-data payload lengths are summed until the buffer
//! drains on a record boundary, at which point the total is reported.

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::record::{parse_record, RecordError, RecordHeader};

/// Initial buffer capacity for one direction.
const INITIAL_CAPACITY: usize = 1024;

/// What a [`RecordStream::feed`] call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Everything buffered was consumed on a record boundary.
    ///
    /// `app_data_len` is the summed application-data payload of all records
    /// consumed since the previous drain (may be zero for handshake-only
    /// traffic).
    Drained { app_data_len: usize },

    /// A partial record is buffered and waits for more bytes.
    Pending { buffered: usize },

    /// The leading bytes matched no record header. The whole buffer was
    /// discarded along with the running total.
    Desynchronized { discarded: usize, error: RecordError },
}

/// Accumulating record buffer for one direction of a flow.
#[derive(Debug)]
pub struct RecordStream {
    buf: BytesMut,
    /// Application-data bytes of records consumed since the last drain.
    running_total: usize,
    records_seen: u64,
}

impl Default for RecordStream {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStream {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            running_total: 0,
            records_seen: 0,
        }
    }

    /// Append freshly reassembled bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Consume the next complete record from the buffer.
    ///
    /// Returns `Ok(None)` when only a partial record is buffered. On a hard
    /// parse failure the entire buffer is discarded before the error is
    /// returned.
    pub fn next_record(&mut self) -> Result<Option<RecordHeader>, RecordError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        match parse_record(&self.buf) {
            Ok(header) => {
                self.buf.advance(header.total_len());
                self.records_seen += 1;
                if header.is_application_data() {
                    self.running_total += header.payload_len;
                }
                Ok(Some(header))
            }
            Err(e) if e.is_incomplete() => Ok(None),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Append `data` and consume every complete record now available.
    pub fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        self.extend(data);

        loop {
            let buffered = self.buf.len();
            match self.next_record() {
                Ok(Some(header)) => {
                    trace!(
                        content_type = ?header.content_type,
                        payload_len = header.payload_len,
                        "Record consumed"
                    );
                }
                Ok(None) => break,
                Err(error) => {
                    return FeedOutcome::Desynchronized {
                        discarded: buffered,
                        error,
                    };
                }
            }
        }

        if self.buf.is_empty() {
            let app_data_len = std::mem::take(&mut self.running_total);
            // Shrink back after a large burst
            if self.buf.capacity() > INITIAL_CAPACITY * 64 {
                self.buf = BytesMut::with_capacity(INITIAL_CAPACITY);
            }
            FeedOutcome::Drained { app_data_len }
        } else {
            FeedOutcome::Pending {
                buffered: self.buf.len(),
            }
        }
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total records consumed over the stream's lifetime.
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    /// Drop buffered bytes and the running total.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.running_total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::ContentType;

    fn record(content_type: u8, payload: usize) -> Vec<u8> {
        let mut out = vec![content_type, 3, 1, (payload >> 8) as u8, payload as u8];
        out.resize(5 + payload, 0x5A);
        out
    }

    #[test]
    fn test_single_record_drains() {
        let mut stream = RecordStream::new();
        let outcome = stream.feed(&record(23, 1200));
        assert_eq!(outcome, FeedOutcome::Drained { app_data_len: 1200 });
        assert_eq!(stream.buffered(), 0);
    }

    #[test]
    fn test_consecutive_records_sum_into_one_total() {
        let mut stream = RecordStream::new();
        let mut data = record(23, 1000);
        data.extend(record(23, 500));
        data.extend(record(23, 24));
        assert_eq!(stream.feed(&data), FeedOutcome::Drained { app_data_len: 1524 });
    }

    #[test]
    fn test_only_application_data_counts() {
        let mut stream = RecordStream::new();
        let mut data = record(22, 4000);
        data.extend(record(20, 1));
        data.extend(record(23, 40));
        data.extend(record(21, 2));
        assert_eq!(stream.feed(&data), FeedOutcome::Drained { app_data_len: 40 });
        assert_eq!(stream.records_seen(), 4);
    }

    #[test]
    fn test_partial_record_is_retained() {
        let mut stream = RecordStream::new();
        let data = record(23, 300);

        assert_eq!(stream.feed(&data[..3]), FeedOutcome::Pending { buffered: 3 });
        assert_eq!(stream.feed(&data[3..100]), FeedOutcome::Pending { buffered: 100 });
        assert_eq!(
            stream.feed(&data[100..]),
            FeedOutcome::Drained { app_data_len: 300 }
        );
    }

    #[test]
    fn test_total_spans_partial_deliveries() {
        let mut stream = RecordStream::new();
        let mut data = record(23, 100);
        data.extend(record(23, 200));

        // First record completes, second is cut short: nothing reported yet
        assert!(matches!(
            stream.feed(&data[..150]),
            FeedOutcome::Pending { .. }
        ));
        assert_eq!(
            stream.feed(&data[150..]),
            FeedOutcome::Drained { app_data_len: 300 }
        );
    }

    #[test]
    fn test_garbage_discards_whole_buffer() {
        let mut stream = RecordStream::new();
        let outcome = stream.feed(b"HTTP/1.1 200 OK\r\n");
        assert!(matches!(
            outcome,
            FeedOutcome::Desynchronized {
                error: RecordError::UnknownContentType(b'H'),
                ..
            }
        ));
        assert_eq!(stream.buffered(), 0);

        // Recovery: a clean record after the discard parses normally
        assert_eq!(
            stream.feed(&record(23, 7)),
            FeedOutcome::Drained { app_data_len: 7 }
        );
    }

    #[test]
    fn test_desync_after_good_record_drops_running_total() {
        let mut stream = RecordStream::new();
        let mut data = record(23, 100);
        data.extend_from_slice(&[0x42, 0x42, 0x42, 0x42, 0x42]);
        assert!(matches!(
            stream.feed(&data),
            FeedOutcome::Desynchronized { .. }
        ));
        assert_eq!(
            stream.feed(&record(23, 10)),
            FeedOutcome::Drained { app_data_len: 10 }
        );
    }

    #[test]
    fn test_desync_outcome_carries_parse_error() {
        let mut stream = RecordStream::new();
        let outcome = stream.feed(&[0x80, 0x02, 0x02, 0x00]);
        let reported = outcome;

        assert_eq!(
            reported,
            FeedOutcome::Desynchronized {
                discarded: 4,
                error: RecordError::BadLegacyTag([0x02, 0x00]),
            }
        );
        assert_eq!(outcome, reported);
    }

    #[test]
    fn test_next_record_reports_headers() {
        let mut stream = RecordStream::new();
        stream.extend(&record(22, 50));
        stream.extend(&record(23, 60)[..10]);

        let first = stream.next_record().unwrap().unwrap();
        assert_eq!(first.content_type, ContentType::Handshake);
        assert_eq!(stream.next_record().unwrap(), None);
        assert_eq!(stream.buffered(), 10);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_records() -> impl Strategy<Value = Vec<(u8, usize)>> {
            prop::collection::vec((20u8..=23, 0usize..2000), 1..20)
        }

        proptest! {
            #[test]
            fn test_chunking_does_not_change_record_sequence(
                records in arb_records(),
                cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..30)
            ) {
                let mut wire = Vec::new();
                for (ct, len) in &records {
                    wire.extend(record(*ct, *len));
                }

                let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
                points.push(0);
                points.push(wire.len());
                points.sort_unstable();
                points.dedup();

                let mut stream = RecordStream::new();
                let mut seen = Vec::new();
                for pair in points.windows(2) {
                    stream.extend(&wire[pair[0]..pair[1]]);
                    while let Some(header) = stream.next_record().unwrap() {
                        seen.push((header.content_type.as_byte(), header.payload_len));
                    }
                }

                prop_assert_eq!(seen, records);
                prop_assert_eq!(stream.buffered(), 0);
            }

            #[test]
            fn test_chunked_feed_reports_same_total(
                records in arb_records(),
                cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..30)
            ) {
                let mut wire = Vec::new();
                for (ct, len) in &records {
                    wire.extend(record(*ct, *len));
                }
                let expected: usize = records
                    .iter()
                    .filter(|(ct, _)| *ct == 23)
                    .map(|(_, len)| *len)
                    .sum();

                let mut points: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
                points.push(0);
                points.push(wire.len());
                points.sort_unstable();
                points.dedup();

                let mut stream = RecordStream::new();
                let mut total = 0;
                for pair in points.windows(2) {
                    if let FeedOutcome::Drained { app_data_len } = stream.feed(&wire[pair[0]..pair[1]]) {
                        total += app_data_len;
                    }
                }

                prop_assert_eq!(total, expected);
            }
        }
    }
}
