//! Rectangle inference.
//!
//! Adjacent columns carrying the identical y interval are evidence of a
//! rectangular tile block. Each maximal run of such columns yields one
//! rectangle, reported from the run's westmost column.

use tracing::trace;

use super::segments::{SegmentMap, YInterval};
use crate::coord::{tile_to_coord, TILE_PIXELS};

/// A block of tiles inferred from matching segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub zoom: u8,
    pub x_lo: u32,
    pub x_hi: u32,
    pub y_lo: u32,
    pub y_hi: u32,
    /// Latitude of the block's centre.
    pub lat: f64,
    /// Longitude of the block's centre.
    pub lon: f64,
}

impl Rectangle {
    /// Build a rectangle and project its centre.
    pub fn new(zoom: u8, x_lo: u32, x_hi: u32, y_lo: u32, y_hi: u32) -> Self {
        let (lat, lon) = block_centre(zoom, x_lo, x_hi, y_lo, y_hi);
        Self {
            zoom,
            x_lo,
            x_hi,
            y_lo,
            y_hi,
            lat,
            lon,
        }
    }

    pub fn width(&self) -> u32 {
        self.x_hi - self.x_lo + 1
    }

    pub fn height(&self) -> u32 {
        self.y_hi - self.y_lo + 1
    }

    /// Area in tiles.
    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }
}

/// Geographic centre of the tile block `[x_lo, x_hi] × [y_lo, y_hi]`.
///
/// An odd extent puts the centre in the middle of a tile, so the pixel
/// offset on that axis is half a tile.
pub fn block_centre(zoom: u8, x_lo: u32, x_hi: u32, y_lo: u32, y_hi: u32) -> (f64, f64) {
    let half = TILE_PIXELS / 2;
    let (x, px) = axis_centre(x_lo, x_hi, half);
    let (y, py) = axis_centre(y_lo, y_hi, half);
    tile_to_coord(zoom, x, y, px, py)
}

fn axis_centre(lo: u32, hi: u32, half: u32) -> (u32, u32) {
    let extent = hi - lo + 1;
    let offset = if extent % 2 == 1 { half } else { 0 };
    (lo + extent / 2, offset)
}

/// Area bounds a rectangle must satisfy to count as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaBounds {
    pub min: u32,
    pub max: u32,
}

impl AreaBounds {
    pub fn contains(&self, area: u32) -> bool {
        (self.min..=self.max).contains(&area)
    }
}

/// Find the rectangles of one zoom level.
///
/// For every column and interval, walk east through the following columns
/// while they are adjacent and carry the identical interval. A walk that
/// advanced at least one column and whose area is within `bounds` yields
/// a rectangle. Walks starting inside a run are skipped so each run is
/// reported once.
pub fn find_rectangles(segments: &SegmentMap, zoom: u8, bounds: AreaBounds) -> Vec<Rectangle> {
    let columns: Vec<u32> = segments.columns().map(|(x, _)| x).collect();
    let mut rectangles = Vec::new();

    for (i, &x) in columns.iter().enumerate() {
        let Some(intervals) = segments.intervals(x) else {
            continue;
        };

        for interval in intervals {
            if continues_run(segments, x, interval) {
                continue;
            }

            let mut last = x;
            for &next in &columns[i + 1..] {
                if next != last + 1 || !segments.contains(next, interval) {
                    break;
                }
                last = next;
            }
            if last == x {
                continue;
            }

            let area = (last - x + 1) * interval.height();
            if !bounds.contains(area) {
                trace!(zoom, x, y_lo = interval.lo, y_hi = interval.hi, area, "Rectangle rejected by area");
                continue;
            }

            let rectangle = Rectangle::new(zoom, x, last, interval.lo, interval.hi);
            trace!(
                zoom,
                area,
                x_lo = rectangle.x_lo,
                x_hi = rectangle.x_hi,
                y_lo = rectangle.y_lo,
                y_hi = rectangle.y_hi,
                lat = rectangle.lat,
                lon = rectangle.lon,
                "Rectangle"
            );
            rectangles.push(rectangle);
        }
    }

    rectangles
}

fn continues_run(segments: &SegmentMap, x: u32, interval: &YInterval) -> bool {
    x.checked_sub(1)
        .is_some_and(|prev| segments.contains(prev, interval))
}
