//! Tunable policy values.
//!
//! Every threshold the engine uses was tuned by hand against real traffic,
//! so each lives here as a field with a documented default rather than as a
//! constant at the point of use. An optional INI file can override any of
//! them:
//!
//! ```ini
//! [analysis]
//! tolerance = 512
//! window_secs = 3
//!
//! [capture]
//! burst_join = false
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Smallest response size considered a tile (2 KiB).
pub const DEFAULT_MIN_TILE_LEN: u32 = 2 * 1024;

/// Largest response size considered a tile (30 KiB).
pub const DEFAULT_MAX_TILE_LEN: u32 = 30 * 1024;

/// Bytes either side of a response size searched in the profile.
///
/// Covers the HTTP headers wrapped around the image plus cipher padding.
pub const DEFAULT_TOLERANCE: u32 = 1024;

/// Sample slots per window.
pub const DEFAULT_MAX_SAMPLES: usize = 50;

/// Smallest rectangle area, in tiles, accepted as evidence.
pub const DEFAULT_MIN_AREA: u32 = 3;

/// Largest rectangle area, in tiles, accepted as evidence.
pub const DEFAULT_MAX_AREA: u32 = 18;

/// Zoom levels tracked per window (`0..DEFAULT_ZOOM_LEVELS`).
pub const DEFAULT_ZOOM_LEVELS: u8 = 20;

/// Slots a y value must appear in before it counts towards a segment.
pub const DEFAULT_MIN_OCCURRENCES: usize = 1;

/// Scale applied to coordinates before bucketing for the estimate.
pub const DEFAULT_PRECISION: f64 = 10_000.0;

/// Length of one analysis window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(2);

/// Interval of the live-mode window expiry check.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Flows followed at once by the reassembler.
pub const DEFAULT_MAX_FLOWS: usize = 4096;

/// Out-of-order segments buffered per flow direction.
pub const DEFAULT_MAX_OUT_OF_ORDER: usize = 64;

/// Flows without traffic for this long are closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Server port followed by the capture.
pub const DEFAULT_SERVER_PORT: u16 = 443;

/// Half the side of the square scanned around the profile location, in degrees.
pub const DEFAULT_SCAN_HALF_RANGE: f64 = 0.05;

/// Coarsest zoom scanned by the profile builder.
pub const DEFAULT_SCAN_MAX_ZOOM: u8 = 17;

/// Finest zoom scanned by the profile builder.
pub const DEFAULT_SCAN_MIN_ZOOM: u8 = 2;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("Invalid value '{value}' for [{section}] {key}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Analysis
// ─────────────────────────────────────────────────────────────────────────────

/// Inference thresholds and window timing.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub min_tile_len: u32,
    pub max_tile_len: u32,
    pub tolerance: u32,
    pub max_samples: usize,
    pub min_area: u32,
    pub max_area: u32,
    pub zoom_levels: u8,
    pub min_occurrences: usize,
    pub precision: f64,
    pub window: Duration,
    pub tick: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_tile_len: DEFAULT_MIN_TILE_LEN,
            max_tile_len: DEFAULT_MAX_TILE_LEN,
            tolerance: DEFAULT_TOLERANCE,
            max_samples: DEFAULT_MAX_SAMPLES,
            min_area: DEFAULT_MIN_AREA,
            max_area: DEFAULT_MAX_AREA,
            zoom_levels: DEFAULT_ZOOM_LEVELS,
            min_occurrences: DEFAULT_MIN_OCCURRENCES,
            precision: DEFAULT_PRECISION,
            window: DEFAULT_WINDOW,
            tick: DEFAULT_TICK,
        }
    }
}

impl AnalysisConfig {
    /// Set the accepted response size domain.
    pub fn with_tile_len(mut self, min: u32, max: u32) -> Self {
        self.min_tile_len = min;
        self.max_tile_len = max;
        self
    }

    /// Set the size tolerance.
    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the sample cap per window.
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    /// Set the accepted rectangle area range.
    pub fn with_area(mut self, min: u32, max: u32) -> Self {
        self.min_area = min;
        self.max_area = max;
        self
    }

    /// Set the minimum slot count for a segment y value.
    pub fn with_min_occurrences(mut self, min_occurrences: usize) -> Self {
        self.min_occurrences = min_occurrences;
        self
    }

    /// Set the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the live tick interval.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Inclusive profile size range searched for a response size.
    ///
    /// The window is `response ± tolerance`, clamped to the tile domain.
    pub fn search_range(&self, response_size: u32) -> std::ops::RangeInclusive<u32> {
        let lo = response_size
            .saturating_sub(self.tolerance)
            .max(self.min_tile_len);
        let hi = response_size
            .saturating_add(self.tolerance)
            .min(self.max_tile_len);
        lo..=hi
    }

    /// Whether a response size is inside the tile domain.
    pub fn accepts_size(&self, response_size: u32) -> bool {
        (self.min_tile_len..=self.max_tile_len).contains(&response_size)
    }

    /// Window length in whole seconds, at least one.
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    fn apply(&mut self, ini: &Ini) -> Result<(), ConfigError> {
        const S: &str = "analysis";
        let Some(section) = ini.section(Some(S)) else {
            return Ok(());
        };
        let get = |key: &'static str| section.get(key).map(|v| (key, v));

        if let Some((k, v)) = get("min_tile_len") {
            self.min_tile_len = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("max_tile_len") {
            self.max_tile_len = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("tolerance") {
            self.tolerance = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("max_samples") {
            self.max_samples = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("min_area") {
            self.min_area = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("max_area") {
            self.max_area = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("min_occurrences") {
            self.min_occurrences = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("precision") {
            self.precision = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("window_secs") {
            self.window = Duration::from_secs(parse(S, k, v)?);
        }
        if let Some((k, v)) = get("tick_secs") {
            self.tick = Duration::from_secs(parse(S, k, v)?);
        }
        Ok(())
    }

    /// Check relationships between fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_tile_len > self.max_tile_len {
            return Err(ConfigError::Inconsistent(format!(
                "min_tile_len {} exceeds max_tile_len {}",
                self.min_tile_len, self.max_tile_len
            )));
        }
        if self.min_area > self.max_area {
            return Err(ConfigError::Inconsistent(format!(
                "min_area {} exceeds max_area {}",
                self.min_area, self.max_area
            )));
        }
        if self.max_samples == 0 {
            return Err(ConfigError::Inconsistent("max_samples must be positive".into()));
        }
        if !(self.precision.is_finite() && self.precision > 0.0) {
            return Err(ConfigError::Inconsistent(format!(
                "precision must be positive, got {}",
                self.precision
            )));
        }
        if self.window.is_zero() || self.tick.is_zero() {
            return Err(ConfigError::Inconsistent(
                "window and tick must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture
// ─────────────────────────────────────────────────────────────────────────────

/// Reassembly and burst pairing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Merge same-direction totals until the direction flips.
    pub burst_join: bool,
    pub history_per_bucket: usize,
    pub flow_buckets: usize,
    pub max_flows: usize,
    pub max_out_of_order: usize,
    pub idle_timeout: Duration,
    pub server_port: u16,
    pub channel_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            burst_join: true,
            history_per_bucket: crate::flow::DEFAULT_HISTORY_PER_BUCKET,
            flow_buckets: crate::flow::DEFAULT_FLOW_BUCKETS,
            max_flows: DEFAULT_MAX_FLOWS,
            max_out_of_order: DEFAULT_MAX_OUT_OF_ORDER,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            server_port: DEFAULT_SERVER_PORT,
            channel_depth: crate::channel::DEFAULT_CHANNEL_DEPTH,
        }
    }
}

impl CaptureConfig {
    /// Enable or disable burst joining.
    pub fn with_burst_join(mut self, join: bool) -> Self {
        self.burst_join = join;
        self
    }

    /// Set the idle flow timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    fn apply(&mut self, ini: &Ini) -> Result<(), ConfigError> {
        const S: &str = "capture";
        let Some(section) = ini.section(Some(S)) else {
            return Ok(());
        };
        let get = |key: &'static str| section.get(key).map(|v| (key, v));

        if let Some((k, v)) = get("burst_join") {
            self.burst_join = parse_bool(S, k, v)?;
        }
        if let Some((k, v)) = get("history_per_bucket") {
            self.history_per_bucket = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("flow_buckets") {
            self.flow_buckets = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("max_flows") {
            self.max_flows = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("max_out_of_order") {
            self.max_out_of_order = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("idle_timeout_secs") {
            self.idle_timeout = Duration::from_secs(parse(S, k, v)?);
        }
        if let Some((k, v)) = get("server_port") {
            self.server_port = parse(S, k, v)?;
        }
        if let Some((k, v)) = get("channel_depth") {
            self.channel_depth = parse(S, k, v)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Profile scan
// ─────────────────────────────────────────────────────────────────────────────

/// Region and zoom range scanned when building a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileScanConfig {
    pub half_range: f64,
    pub max_zoom: u8,
    pub min_zoom: u8,
}

impl Default for ProfileScanConfig {
    fn default() -> Self {
        Self {
            half_range: DEFAULT_SCAN_HALF_RANGE,
            max_zoom: DEFAULT_SCAN_MAX_ZOOM,
            min_zoom: DEFAULT_SCAN_MIN_ZOOM,
        }
    }
}

impl ProfileScanConfig {
    /// Set the half range in degrees.
    pub fn with_half_range(mut self, half_range: f64) -> Self {
        self.half_range = half_range;
        self
    }

    /// Set the scanned zoom range, coarsest first.
    pub fn with_zoom_range(mut self, max_zoom: u8, min_zoom: u8) -> Self {
        self.max_zoom = max_zoom;
        self.min_zoom = min_zoom;
        self
    }

    /// Zoom levels to scan, from coarse to fine.
    pub fn zoom_levels(&self) -> impl Iterator<Item = u8> {
        (self.min_zoom..=self.max_zoom).rev()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File overlay
// ─────────────────────────────────────────────────────────────────────────────

/// Analyzer settings, optionally overlaid from an INI file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub analysis: AnalysisConfig,
    pub capture: CaptureConfig,
}

impl Settings {
    /// Load defaults overlaid with the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Defaults overlaid with an INI document held in memory.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Load {
            path: PathBuf::from("<memory>"),
            source: ini::Error::Parse(e),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.analysis.apply(ini)?;
        settings.capture.apply(ini)?;
        settings.analysis.validate()?;
        Ok(settings)
    }
}

fn parse<T: FromStr>(section: &'static str, key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
    })
}

fn parse_bool(section: &'static str, key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            section,
            key,
            value: value.to_string(),
        }),
    }
}
