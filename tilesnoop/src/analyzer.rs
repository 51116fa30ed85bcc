//! The analysis task.
//!
//! [`Analyzer::run`] is the only place the analysis side waits. It
//! multiplexes channel data, a periodic tick that closes expired live
//! windows, and cancellation. All inference state lives inside the call and
//! is rebuilt for every window; the profile is shared read-only.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::analysis::{
    analyze_table, Admission, CandidateMatcher, LocationEstimate, Rectangle, Window,
    WindowClock,
};
use crate::channel::{FrameError, FrameReceiver};
use crate::config::AnalysisConfig;
use crate::flow::Exchange;
use crate::profile::ProfileStore;

/// Shortest accepted tick period.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Errors that end an analysis run.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Channel protocol violation: {0}")]
    Frame(#[from] FrameError),

    #[error("Capture task terminated unexpectedly")]
    CaptureTerminated,
}

/// How windows are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Wall-clock windows; the capture side is never expected to finish.
    Live,
    /// Windows measured on exchange timestamps; end of input flushes the
    /// last window.
    Offline,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    EndOfInput,
    /// Cancelled; the open window was discarded.
    Interrupted,
}

/// Result of analysing one window.
#[derive(Debug, Clone)]
pub struct WindowReport {
    /// Seconds timestamp the window opened at.
    pub start: u64,
    /// Exclusive end of the window span.
    pub end: u64,
    pub exchanges: usize,
    /// Exchanges whose response size could not be a tile.
    pub out_of_range: usize,
    /// Exchanges refused because the sample cap was reached.
    pub dropped: usize,
    pub rectangles: Vec<Rectangle>,
    pub estimate: Option<LocationEstimate>,
}

/// Drives window inference from the frame channel.
#[derive(Debug, Clone)]
pub struct Analyzer {
    profile: Arc<ProfileStore>,
    config: AnalysisConfig,
    mode: AnalysisMode,
}

// ─────────────────────────────────────────────────────────────────────────────
// Window bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

struct OpenWindow {
    window: Window,
    opened_at: Instant,
}

struct Windows<'a> {
    matcher: CandidateMatcher<'a>,
    config: &'a AnalysisConfig,
    clock: WindowClock,
    open: Option<OpenWindow>,
}

impl<'a> Windows<'a> {
    fn new(matcher: CandidateMatcher<'a>, config: &'a AnalysisConfig) -> Self {
        Self {
            matcher,
            config,
            clock: WindowClock::new(config.window_secs()),
            open: None,
        }
    }

    fn open_at(&mut self, start: u64) {
        self.open = Some(OpenWindow {
            window: Window::new(start, self.matcher.new_table()),
            opened_at: Instant::now(),
        });
    }

    /// Offline placement by exchange timestamp.
    fn offer_offline(&mut self, exchange: &Exchange) -> Option<WindowReport> {
        let mut closed = None;
        match self.clock.admit(exchange.timestamp) {
            Admission::Opened => self.open_at(exchange.timestamp),
            Admission::Inside => {}
            Admission::Expired => {
                closed = self.close();
                self.clock.restart(exchange.timestamp);
                self.open_at(exchange.timestamp);
            }
        }
        self.add(exchange);
        closed
    }

    /// Live placement by arrival time.
    fn offer_live(&mut self, exchange: &Exchange) -> Option<WindowReport> {
        let closed = if self.live_expired() { self.close() } else { None };
        if self.open.is_none() {
            self.open_at(wall_clock_secs());
        }
        self.add(exchange);
        closed
    }

    fn add(&mut self, exchange: &Exchange) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        let outcome = open.window.add(&self.matcher, exchange);
        trace!(?outcome, response = exchange.response_size, "Exchange offered");
    }

    fn live_expired(&self) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| open.opened_at.elapsed() >= self.config.window)
    }

    fn close(&mut self) -> Option<WindowReport> {
        let open = self.open.take()?;
        let window = open.window;
        let table = window.table();
        let inference = analyze_table(table, self.config);

        let report = WindowReport {
            start: window.start,
            end: window.start.saturating_add(self.config.window_secs()),
            exchanges: window.exchanges(),
            out_of_range: table.out_of_range(),
            dropped: table.dropped(),
            rectangles: inference.rectangles,
            estimate: inference.estimate,
        };
        info!(
            start = report.start,
            exchanges = report.exchanges,
            samples = table.slots_used(),
            rectangles = report.rectangles.len(),
            located = report.estimate.is_some(),
            "Window analysed"
        );
        Some(report)
    }

    fn discard(&mut self) {
        if let Some(open) = self.open.take() {
            debug!(
                start = open.window.start,
                exchanges = open.window.exchanges(),
                "Discarding open window"
            );
        }
    }
}

fn wall_clock_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Analyzer
// ─────────────────────────────────────────────────────────────────────────────

impl Analyzer {
    pub fn new(profile: Arc<ProfileStore>, config: AnalysisConfig, mode: AnalysisMode) -> Self {
        Self {
            profile,
            config,
            mode,
        }
    }

    /// Consume exchanges until end of input, cancellation, or error.
    ///
    /// Every closed window is handed to `sink`. Cancellation wins over
    /// pending data and discards the open window. In offline mode the end
    /// of the channel analyses the last window; in live mode it is
    /// [`AnalyzerError::CaptureTerminated`].
    pub async fn run<F>(
        &self,
        mut frames: FrameReceiver,
        cancel: CancellationToken,
        mut sink: F,
    ) -> Result<RunOutcome, AnalyzerError>
    where
        F: FnMut(WindowReport),
    {
        let live = self.mode == AnalysisMode::Live;
        let matcher = CandidateMatcher::new(&self.profile, &self.config);
        let mut windows = Windows::new(matcher, &self.config);

        let mut ticker = tokio::time::interval(self.config.tick.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            mode = ?self.mode,
            window_secs = self.config.window_secs(),
            profile_sizes = self.profile.size_count(),
            "Analyzer started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    windows.discard();
                    frames.close();
                    info!("Analyzer interrupted");
                    return Ok(RunOutcome::Interrupted);
                }

                frame = frames.recv() => {
                    let Some(exchange) = frame? else {
                        if live {
                            return Err(AnalyzerError::CaptureTerminated);
                        }
                        if let Some(report) = windows.close() {
                            sink(report);
                        }
                        info!("End of input");
                        return Ok(RunOutcome::EndOfInput);
                    };

                    let closed = if live {
                        windows.offer_live(&exchange)
                    } else {
                        windows.offer_offline(&exchange)
                    };
                    if let Some(report) = closed {
                        sink(report);
                    }
                }

                _ = ticker.tick(), if live => {
                    if windows.live_expired() {
                        if let Some(report) = windows.close() {
                            sink(report);
                        }
                    }
                }
            }
        }
    }
}
