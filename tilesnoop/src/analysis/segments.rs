//! Segment inference.
//!
//! A tile block under view answers with tiles whose y values are consecutive
//! in every column it covers. Per column, the y values that recur across
//! sample slots are grouped into maximal runs of consecutive integers, and
//! every sub-interval of a run becomes a [`Segment`]. Rectangle search then
//! only has to compare intervals for equality.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use super::candidates::CandidateTable;

/// An inclusive y interval `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YInterval {
    pub lo: u32,
    pub hi: u32,
}

impl YInterval {
    pub fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    /// Tiles covered.
    pub fn height(&self) -> u32 {
        self.hi - self.lo + 1
    }
}

/// A contiguous y range at one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Segment {
    pub x: u32,
    pub y_lo: u32,
    pub y_hi: u32,
}

/// Segments of one zoom level: column to its distinct intervals, both in
/// ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentMap {
    columns: BTreeMap<u32, BTreeSet<YInterval>>,
}

impl SegmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one interval at `x`. Returns false if it was already present.
    pub fn insert(&mut self, x: u32, interval: YInterval) -> bool {
        self.columns.entry(x).or_default().insert(interval)
    }

    /// Intervals at `x`.
    pub fn intervals(&self, x: u32) -> Option<&BTreeSet<YInterval>> {
        self.columns.get(&x)
    }

    /// Whether `x` carries exactly `interval`.
    pub fn contains(&self, x: u32, interval: &YInterval) -> bool {
        self.columns
            .get(&x)
            .is_some_and(|set| set.contains(interval))
    }

    /// Columns carrying segments, ascending.
    pub fn columns(&self) -> impl Iterator<Item = (u32, &BTreeSet<YInterval>)> + '_ {
        self.columns.iter().map(|(&x, set)| (x, set))
    }

    /// Flatten into segments ordered by column then interval.
    pub fn segments(&self) -> Vec<Segment> {
        self.columns
            .iter()
            .flat_map(|(&x, set)| {
                set.iter().map(move |i| Segment {
                    x,
                    y_lo: i.lo,
                    y_hi: i.hi,
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.values().map(BTreeSet::len).sum()
    }
}

/// Count, for each y, the slots at `zoom` holding a candidate `(x, y)`.
pub fn column_histogram(table: &CandidateTable, zoom: u8, x: u32) -> BTreeMap<u32, usize> {
    let mut histogram = BTreeMap::new();
    for columns in table.slots_at_zoom(zoom) {
        if let Some(ys) = columns.get(&x) {
            for &y in ys {
                *histogram.entry(y).or_insert(0) += 1;
            }
        }
    }
    histogram
}

/// Maximal runs of consecutive integers in an ascending sequence.
///
/// Single values form one-element runs.
pub fn maximal_runs(sorted: impl IntoIterator<Item = u32>) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    let mut current: Option<(u32, u32)> = None;

    for y in sorted {
        current = match current {
            Some((lo, hi)) if hi.checked_add(1) == Some(y) => Some((lo, y)),
            Some(run) => {
                runs.push(run);
                Some((y, y))
            }
            None => Some((y, y)),
        };
    }
    runs.extend(current);
    runs
}

/// Every `[i, j]` with `lo <= i <= j <= hi`.
pub fn sub_intervals(lo: u32, hi: u32) -> impl Iterator<Item = YInterval> {
    (lo..=hi).flat_map(move |i| (i..=hi).map(move |j| YInterval::new(i, j)))
}

/// Infer the segments of one zoom level.
///
/// Only y values present in at least `min_occurrences` slots qualify, and
/// only runs spanning two or more rows produce segments.
pub fn segments_for_zoom(table: &CandidateTable, zoom: u8, min_occurrences: usize) -> SegmentMap {
    let mut segments = SegmentMap::new();

    for &x in table.seen_columns() {
        let histogram = column_histogram(table, zoom, x);
        if histogram.is_empty() {
            continue;
        }

        let qualifying = histogram
            .iter()
            .filter(|&(_, &count)| count >= min_occurrences)
            .map(|(&y, _)| y);

        for (lo, hi) in maximal_runs(qualifying) {
            if lo == hi {
                continue;
            }
            for interval in sub_intervals(lo, hi) {
                if segments.insert(x, interval) {
                    trace!(
                        zoom,
                        x,
                        y_lo = interval.lo,
                        y_hi = interval.hi,
                        "Found line segment"
                    );
                }
            }
        }
    }

    segments
}
