//! Burst extraction.
//!
//! A burst is one contiguous run of same-direction application data on a
//! flow. The record layer reports a total each time a direction's buffer
//! drains; the extractor either emits every total directly or, in join
//! mode, merges consecutive same-direction totals until the direction
//! flips.

use tracing::trace;

use super::key::{Direction, FlowKey};

/// One directional burst on a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    pub flow: FlowKey,
    pub direction: Direction,
    /// Application-data payload bytes in the burst.
    pub len: usize,
    /// Seconds timestamp of the first data in the burst.
    pub timestamp: u64,
    /// Set when the flow ended before the burst was closed by a
    /// direction change.
    pub incomplete: bool,
}

/// Per-flow join state.
#[derive(Debug, Clone, Default)]
pub struct BurstState {
    last_direction: Option<Direction>,
    accumulated: usize,
    started: u64,
    seen_any: bool,
}

impl BurstState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes accumulated in the open burst.
    pub fn accumulated(&self) -> usize {
        self.accumulated
    }

    /// Direction of the open burst, if any data was observed.
    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }
}

/// Turns drained record totals into bursts.
#[derive(Debug, Clone, Copy)]
pub struct BurstExtractor {
    join: bool,
}

impl BurstExtractor {
    /// Create an extractor; `join` merges same-direction totals.
    pub fn new(join: bool) -> Self {
        Self { join }
    }

    /// Observe one drained total for `direction`.
    ///
    /// Returns the burst this observation completes, if any. Without join
    /// that is the observation itself; with join it is the previous burst
    /// once the direction changes.
    pub fn observe(
        &self,
        state: &mut BurstState,
        flow: FlowKey,
        direction: Direction,
        total: usize,
        timestamp: u64,
    ) -> Option<Burst> {
        if !self.join {
            state.last_direction = Some(direction);
            state.seen_any = true;
            return (total > 0).then_some(Burst {
                flow,
                direction,
                len: total,
                timestamp,
                incomplete: false,
            });
        }

        if !state.seen_any {
            state.seen_any = true;
            Self::open(state, direction, total, timestamp);
            return None;
        }

        if state.last_direction != Some(direction) {
            let finished = Self::take(state, flow, false);
            Self::open(state, direction, total, timestamp);
            return finished;
        }

        if state.accumulated == 0 && total > 0 {
            state.started = timestamp;
        }
        state.accumulated += total;
        trace!(
            flow = %flow,
            direction = %direction,
            accumulated = state.accumulated,
            "Burst extended"
        );
        None
    }

    /// Flush the open burst when the flow terminates.
    ///
    /// The flushed burst is marked incomplete.
    pub fn finish(&self, state: &mut BurstState, flow: FlowKey) -> Option<Burst> {
        let burst = Self::take(state, flow, true);
        *state = BurstState::default();
        burst
    }

    fn open(state: &mut BurstState, direction: Direction, total: usize, timestamp: u64) {
        state.last_direction = Some(direction);
        state.accumulated = total;
        state.started = timestamp;
    }

    fn take(state: &mut BurstState, flow: FlowKey, incomplete: bool) -> Option<Burst> {
        let direction = state.last_direction?;
        let len = std::mem::take(&mut state.accumulated);
        (len > 0).then_some(Burst {
            flow,
            direction,
            len,
            timestamp: state.started,
            incomplete,
        })
    }
}
