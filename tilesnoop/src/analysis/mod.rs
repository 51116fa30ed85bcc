//! Location inference.
//!
//! Each window's exchanges are looked up in the profile, producing per-slot
//! candidate tiles. Recurring vertical runs of candidates become segments,
//! identical segments in adjacent columns become rectangles, and the
//! rectangle centres are averaged into a location estimate.
//!
//! ```
//! use tilesnoop::analysis::{analyze_table, CandidateMatcher};
//! use tilesnoop::config::AnalysisConfig;
//! use tilesnoop::coord::TileCoordinate;
//! use tilesnoop::flow::Exchange;
//! use tilesnoop::profile::ProfileStore;
//!
//! let mut profile = ProfileStore::new();
//! profile.insert(5000, TileCoordinate::new(100, 200, 6));
//! profile.insert(5010, TileCoordinate::new(100, 201, 6));
//! profile.insert(5020, TileCoordinate::new(101, 200, 6));
//! profile.insert(5030, TileCoordinate::new(101, 201, 6));
//!
//! let config = AnalysisConfig::default();
//! let matcher = CandidateMatcher::new(&profile, &config);
//! let mut table = matcher.new_table();
//! for size in [5005, 5015, 5005, 5015] {
//!     matcher.add(&mut table, &Exchange::new(1, 400, size));
//! }
//!
//! let inference = analyze_table(&table, &config);
//! assert_eq!(inference.rectangles.len(), 1);
//! assert!(inference.estimate.is_some());
//! ```

mod candidates;
mod estimate;
mod rectangles;
mod segments;
mod window;

pub use candidates::{AddOutcome, CandidateMatcher, CandidateTable, ColumnMap};
pub use estimate::{estimate_location, AxisHistogram, LocationEstimate};
pub use rectangles::{block_centre, find_rectangles, AreaBounds, Rectangle};
pub use segments::{
    column_histogram, maximal_runs, segments_for_zoom, sub_intervals, Segment, SegmentMap,
    YInterval,
};
pub use window::{Admission, Window, WindowClock};

use tracing::debug;

use crate::config::AnalysisConfig;

/// Result of one inference pass.
#[derive(Debug, Clone, Default)]
pub struct Inference {
    pub rectangles: Vec<Rectangle>,
    pub estimate: Option<LocationEstimate>,
}

/// Run segment, rectangle and location inference over a filled table.
pub fn analyze_table(table: &CandidateTable, config: &AnalysisConfig) -> Inference {
    let bounds = AreaBounds {
        min: config.min_area,
        max: config.max_area,
    };

    let mut rectangles = Vec::new();
    for zoom in 0..table.zoom_levels() {
        let segments = segments_for_zoom(table, zoom, config.min_occurrences);
        if segments.is_empty() {
            continue;
        }
        let found = find_rectangles(&segments, zoom, bounds);
        debug!(
            zoom,
            segments = segments.len(),
            rectangles = found.len(),
            "Zoom level analysed"
        );
        rectangles.extend(found);
    }

    if rectangles.is_empty() {
        debug!(slots = table.slots_used(), "No rectangles found");
    } else {
        debug!(count = rectangles.len(), "Found rectangles");
    }

    let estimate = estimate_location(&rectangles, config.precision);
    Inference {
        rectangles,
        estimate,
    }
}
