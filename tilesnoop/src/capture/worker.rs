//! The capture task.
//!
//! [`CaptureWorker`] owns every piece of per-flow capture state: the record
//! streams of both directions, the burst join state and the exchange
//! history. [`run_capture`] drives it from a packet source and forwards the
//! resulting exchanges over the frame channel.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::reassembly::{ReassemblyStats, TcpReassembler};
use super::source::{Fetched, PacketSource};
use super::{CaptureError, StreamEvent};
use crate::channel::{FrameError, FrameSender};
use crate::config::CaptureConfig;
use crate::flow::{BurstExtractor, BurstState, Direction, Exchange, ExchangeMatcher, FlowKey};
use crate::hosts::ServerAllowList;
use crate::tls::{FeedOutcome, RecordStream};

#[derive(Debug, Default)]
struct FlowStreams {
    client: RecordStream,
    server: RecordStream,
    bursts: BurstState,
}

/// Turns reassembled stream events into exchanges.
#[derive(Debug)]
pub struct CaptureWorker {
    extractor: BurstExtractor,
    matcher: ExchangeMatcher,
    flows: HashMap<FlowKey, FlowStreams>,
    desynchronized: u64,
}

impl CaptureWorker {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            extractor: BurstExtractor::new(config.burst_join),
            matcher: ExchangeMatcher::new(config.flow_buckets, config.history_per_bucket),
            flows: HashMap::new(),
            desynchronized: 0,
        }
    }

    /// Handle one event, appending completed exchanges to `out`.
    pub fn handle(&mut self, event: StreamEvent, out: &mut Vec<Exchange>) {
        match event {
            StreamEvent::Opened { flow, .. } => {
                self.flows.insert(flow, FlowStreams::default());
            }
            StreamEvent::Data {
                flow,
                direction,
                timestamp,
                bytes,
            } => {
                let streams = self.flows.entry(flow).or_default();
                let stream = match direction {
                    Direction::ClientToServer => &mut streams.client,
                    Direction::ServerToClient => &mut streams.server,
                };

                match stream.feed(&bytes) {
                    FeedOutcome::Drained { app_data_len } => {
                        let burst = self.extractor.observe(
                            &mut streams.bursts,
                            flow,
                            direction,
                            app_data_len,
                            timestamp,
                        );
                        if let Some(burst) = burst {
                            trace!(flow = %flow, direction = %burst.direction, len = burst.len, "Burst");
                            out.extend(self.matcher.on_burst(&burst));
                        }
                    }
                    FeedOutcome::Pending { buffered } => {
                        trace!(flow = %flow, direction = %direction, buffered, "Partial record buffered");
                    }
                    FeedOutcome::Desynchronized { discarded, error } => {
                        self.desynchronized += 1;
                        warn!(
                            flow = %flow,
                            direction = %direction,
                            discarded,
                            records = stream.records_seen(),
                            error = %error,
                            "Stream desynchronized, buffer discarded"
                        );
                    }
                }
            }
            StreamEvent::Closed { flow, reason, .. } => {
                if let Some(mut streams) = self.flows.remove(&flow) {
                    if let Some(burst) = self.extractor.finish(&mut streams.bursts, flow) {
                        out.extend(self.matcher.on_burst(&burst));
                    }
                }
                self.matcher.forget_flow(&flow);
                trace!(flow = %flow, reason = ?reason, "Flow state released");
            }
        }
    }

    /// Flows with live record state.
    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    /// Times a direction's buffer was discarded as non-record traffic.
    pub fn desynchronized(&self) -> u64 {
        self.desynchronized
    }
}

/// What a finished capture run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub exchanges: u64,
    pub reassembly: ReassemblyStats,
    /// The run stopped because the token was cancelled.
    pub cancelled: bool,
    /// The analysis side closed the channel first.
    pub receiver_gone: bool,
}

fn wall_clock_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Body of the capture task.
///
/// Blocks the calling thread; run it on a dedicated thread or through
/// `tokio::task::spawn_blocking`. Returns when the source is exhausted,
/// `cancel` fires, or the receiving side of the channel is gone. Dropping
/// `sender` on return is what signals end of input to the analyzer.
pub fn run_capture(
    mut source: Box<dyn PacketSource>,
    allow: ServerAllowList,
    config: &CaptureConfig,
    mut sender: FrameSender,
    cancel: CancellationToken,
) -> Result<CaptureSummary, CaptureError> {
    info!(source = %source.describe(), servers = allow.len(), "Capture started");

    let mut reassembler = TcpReassembler::new(allow, source.link_type(), config);
    let mut worker = CaptureWorker::new(config);
    let mut summary = CaptureSummary::default();
    let mut events = Vec::new();
    let mut exchanges = Vec::new();
    let mut last_timestamp = 0;

    loop {
        if cancel.is_cancelled() {
            debug!("Capture cancelled");
            summary.cancelled = true;
            break;
        }

        let at_end = match source.next_packet()? {
            Fetched::Packet(packet) => {
                last_timestamp = packet.timestamp;
                reassembler.process(&packet, &mut events);
                false
            }
            Fetched::Timeout => {
                reassembler.sweep(wall_clock_secs(), &mut events);
                false
            }
            Fetched::Eof => {
                reassembler.finish(last_timestamp, &mut events);
                true
            }
        };

        for event in events.drain(..) {
            worker.handle(event, &mut exchanges);
        }
        for exchange in exchanges.drain(..) {
            match sender.blocking_send(exchange) {
                Ok(()) => summary.exchanges += 1,
                Err(FrameError::Closed) => summary.receiver_gone = true,
                Err(e) => return Err(e.into()),
            }
            if summary.receiver_gone {
                break;
            }
        }
        if summary.receiver_gone {
            debug!("Analysis side closed the channel");
            break;
        }
        if at_end {
            break;
        }
    }

    summary.reassembly = reassembler.stats();
    info!(
        exchanges = summary.exchanges,
        packets = summary.reassembly.packets,
        flows = summary.reassembly.flows_opened,
        desynchronized = worker.desynchronized(),
        unmatched = worker.matcher.unmatched(),
        open_flows = worker.active_flows(),
        "Capture finished"
    );
    Ok(summary)
}
