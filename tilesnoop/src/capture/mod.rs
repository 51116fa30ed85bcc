//! Packet capture and stream reconstruction.
//!
//! The capture side runs on a blocking thread: packets come from a
//! [`PacketSource`], TCP segments are reassembled into ordered byte streams
//! by [`TcpReassembler`], and [`CaptureWorker`] turns those streams into
//! [`Exchange`](crate::flow::Exchange)s that are sent over the frame
//! channel.
//!
//! ```text
//! PacketSource ──► TcpReassembler ──► StreamEvent ──► CaptureWorker ──► FrameSender
//!                  (etherparse)                       (records, bursts,
//!                                                      exchange matching)
//! ```

mod reassembly;
mod source;
mod worker;

use std::path::PathBuf;

use bytes::Bytes;
use thiserror::Error;

use crate::flow::{Direction, FlowKey};

pub use reassembly::{ReassemblyStats, TcpReassembler};
pub use source::{Fetched, LinkType, LiveSource, MemorySource, OfflineSource, PacketSource, RawPacket};
pub use worker::{run_capture, CaptureSummary, CaptureWorker};

/// Errors from the capture side.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open capture {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid capture file {path}: {reason}")]
    BadCaptureFile { path: PathBuf, reason: String },

    #[error("Unsupported link type: {0}")]
    UnsupportedLinkType(i32),

    #[error("Failed to install capture filter: {0}")]
    Filter(String),

    #[error("Capture device error: {0}")]
    Device(String),

    #[error("Live capture support is not compiled in")]
    LiveUnsupported,

    #[error("Channel error: {0}")]
    Channel(#[from] crate::channel::FrameError),
}

/// Why a reassembled stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Both sides sent FIN.
    Fin,
    Reset,
    /// No traffic within the idle timeout.
    Timeout,
    /// Too many out-of-order segments were buffered.
    Overflow,
    /// The packet source ended with the flow still open.
    EndOfInput,
}

/// Output of the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Opened {
        flow: FlowKey,
        timestamp: u64,
    },
    /// In-order payload bytes for one direction.
    Data {
        flow: FlowKey,
        direction: Direction,
        timestamp: u64,
        bytes: Bytes,
    },
    Closed {
        flow: FlowKey,
        reason: CloseReason,
        timestamp: u64,
    },
}

impl StreamEvent {
    pub fn flow(&self) -> &FlowKey {
        match self {
            StreamEvent::Opened { flow, .. }
            | StreamEvent::Data { flow, .. }
            | StreamEvent::Closed { flow, .. } => flow,
        }
    }
}
