//! Analysis windows.
//!
//! A window collects exchanges for a fixed span before one inference pass.
//! In offline replay the span is measured on exchange timestamps; a window
//! covers `[start, start + length)` and the first exchange at or past the
//! end closes it and opens the next one. Live windows are measured on the
//! wall clock by the caller.

use super::candidates::{AddOutcome, CandidateMatcher, CandidateTable};
use crate::flow::Exchange;

/// Whether an exchange belongs to the open window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The exchange opened the first window.
    Opened,
    /// The exchange falls inside the open window.
    Inside,
    /// The exchange lies past the open window, which must be closed first.
    Expired,
}

/// Offline window boundary tracking.
#[derive(Debug, Clone, Copy)]
pub struct WindowClock {
    length: u64,
    start: Option<u64>,
}

impl WindowClock {
    /// A clock producing windows of `length` seconds (at least one).
    pub fn new(length: u64) -> Self {
        Self {
            length: length.max(1),
            start: None,
        }
    }

    /// Classify `timestamp` against the open window.
    pub fn admit(&mut self, timestamp: u64) -> Admission {
        match self.start {
            None => {
                self.start = Some(timestamp);
                Admission::Opened
            }
            Some(start) if timestamp < start.saturating_add(self.length) => Admission::Inside,
            Some(_) => Admission::Expired,
        }
    }

    /// Open a new window at `timestamp`.
    pub fn restart(&mut self, timestamp: u64) {
        self.start = Some(timestamp);
    }

    /// Forget the open window.
    pub fn reset(&mut self) {
        self.start = None;
    }

    pub fn start(&self) -> Option<u64> {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

/// Exchanges collected for one window.
#[derive(Debug, Clone)]
pub struct Window {
    pub start: u64,
    pub last: u64,
    table: CandidateTable,
    exchanges: usize,
}

impl Window {
    pub fn new(start: u64, table: CandidateTable) -> Self {
        Self {
            start,
            last: start,
            table,
            exchanges: 0,
        }
    }

    /// Feed one exchange through the matcher.
    pub fn add(&mut self, matcher: &CandidateMatcher<'_>, exchange: &Exchange) -> AddOutcome {
        self.exchanges += 1;
        self.last = self.last.max(exchange.timestamp);
        matcher.add(&mut self.table, exchange)
    }

    /// Exchanges offered to this window.
    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    pub fn table(&self) -> &CandidateTable {
        &self.table
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges == 0
    }
}
