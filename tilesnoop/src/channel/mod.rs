//! Framed channel between the capture task and the analysis task.
//!
//! The capture side encodes each [`Exchange`] into a tagged frame and ships
//! the bytes over a bounded `mpsc` channel. The analysis side reassembles
//! frames from whatever chunks arrive, so the frame boundary never has to
//! coincide with a message boundary.

mod codec;

pub use codec::{ExchangeCodec, FrameError, EXCHANGE_TAG, FRAME_LEN};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};

use crate::flow::Exchange;

/// Default channel depth in messages.
pub const DEFAULT_CHANNEL_DEPTH: usize = 1024;

/// Create a connected sender/receiver pair.
pub fn frame_channel(depth: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        FrameSender {
            tx,
            codec: ExchangeCodec,
        },
        FrameReceiver {
            rx,
            buf: BytesMut::with_capacity(FRAME_LEN * 64),
            codec: ExchangeCodec,
        },
    )
}

/// Capture-side end of the channel.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Bytes>,
    codec: ExchangeCodec,
}

impl FrameSender {
    /// Encode one exchange into a standalone frame.
    pub fn encode(&mut self, exchange: Exchange) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        self.codec.encode(exchange, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Send one exchange from async code.
    pub async fn send(&mut self, exchange: Exchange) -> Result<(), FrameError> {
        let frame = self.encode(exchange)?;
        self.tx.send(frame).await.map_err(|_| FrameError::Closed)
    }

    /// Send one exchange from a blocking thread.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_send(&mut self, exchange: Exchange) -> Result<(), FrameError> {
        let frame = self.encode(exchange)?;
        self.tx.blocking_send(frame).map_err(|_| FrameError::Closed)
    }

    /// Send raw bytes, for peers that frame their own messages.
    pub async fn send_raw(&self, bytes: Bytes) -> Result<(), FrameError> {
        self.tx.send(bytes).await.map_err(|_| FrameError::Closed)
    }

    /// Whether the analysis side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Analysis-side end of the channel.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<Bytes>,
    buf: BytesMut,
    codec: ExchangeCodec,
}

impl FrameReceiver {
    /// Wait for the next exchange.
    ///
    /// Returns `Ok(None)` once every sender is dropped and no complete
    /// frame remains. A trailing partial frame at that point is discarded.
    /// This method is cancel safe: bytes already received stay buffered.
    pub async fn recv(&mut self) -> Result<Option<Exchange>, FrameError> {
        loop {
            if let Some(exchange) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(exchange));
            }
            match self.rx.recv().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => {
                    if !self.buf.is_empty() {
                        tracing::warn!(
                            bytes = self.buf.len(),
                            "Discarding partial frame at end of channel"
                        );
                        self.buf.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Stop accepting new messages; senders observe the channel as closed.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchanges_arrive_in_order() {
        let (mut tx, mut rx) = frame_channel(8);
        tx.send(Exchange::new(1, 100, 5000)).await.unwrap();
        tx.send(Exchange::new(2, 200, 6000)).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), Some(Exchange::new(1, 100, 5000)));
        assert_eq!(rx.recv().await.unwrap(), Some(Exchange::new(2, 200, 6000)));
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let (mut tx, mut rx) = frame_channel(8);
        let mut frames = BytesMut::new();
        frames.extend_from_slice(&tx.encode(Exchange::new(7, 1, 2)).unwrap());
        frames.extend_from_slice(&tx.encode(Exchange::new(8, 3, 4)).unwrap());
        let frames = frames.freeze();

        tx.send_raw(frames.slice(..5)).await.unwrap();
        tx.send_raw(frames.slice(5..20)).await.unwrap();
        tx.send_raw(frames.slice(20..)).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), Some(Exchange::new(7, 1, 2)));
        assert_eq!(rx.recv().await.unwrap(), Some(Exchange::new(8, 3, 4)));
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_tag_is_fatal() {
        let (tx, mut rx) = frame_channel(8);
        tx.send_raw(Bytes::from_static(b"Zjunk")).await.unwrap();
        assert!(matches!(rx.recv().await, Err(FrameError::UnknownTag(b'Z'))));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut tx, mut rx) = frame_channel(8);
        rx.close();
        assert!(tx.is_closed());
        assert!(matches!(
            tx.send(Exchange::new(1, 1, 1)).await,
            Err(FrameError::Closed)
        ));
    }

    #[test]
    fn test_blocking_send_from_thread() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let (mut tx, mut rx) = frame_channel(8);

        let worker = std::thread::spawn(move || {
            tx.blocking_send(Exchange::new(3, 30, 3000)).unwrap();
        });
        let received = runtime.block_on(rx.recv()).unwrap();
        worker.join().unwrap();

        assert_eq!(received, Some(Exchange::new(3, 30, 3000)));
    }
}
