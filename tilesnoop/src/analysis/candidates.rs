//! Size-tolerant candidate lookup.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{trace, warn};

use crate::config::AnalysisConfig;
use crate::flow::Exchange;
use crate::profile::ProfileStore;

/// Candidate y values per column for one (zoom, slot).
pub type ColumnMap = BTreeMap<u32, BTreeSet<u32>>;

/// What happened to an exchange offered to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The exchange took a sample slot and contributed this many
    /// candidate tiles.
    Added { slot: usize, candidates: usize },
    /// The response size lies outside the tile domain.
    OutOfRange,
    /// Every sample slot of the window is taken.
    CapReached,
}

/// Per-window candidate tiles, indexed by sample slot and zoom level.
#[derive(Debug, Clone)]
pub struct CandidateTable {
    /// `slots[slot][zoom]`
    slots: Vec<Vec<ColumnMap>>,
    max_samples: usize,
    zoom_levels: u8,
    seen_columns: BTreeSet<u32>,
    out_of_range: usize,
    dropped: usize,
    cap_warned: bool,
}

impl CandidateTable {
    pub fn new(max_samples: usize, zoom_levels: u8) -> Self {
        Self {
            slots: Vec::with_capacity(max_samples),
            max_samples,
            zoom_levels,
            seen_columns: BTreeSet::new(),
            out_of_range: 0,
            dropped: 0,
            cap_warned: false,
        }
    }

    /// Sample slots taken so far.
    pub fn slots_used(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.max_samples
    }

    pub fn zoom_levels(&self) -> u8 {
        self.zoom_levels
    }

    /// Every column that received a candidate at any zoom.
    pub fn seen_columns(&self) -> &BTreeSet<u32> {
        &self.seen_columns
    }

    /// Candidates of one (zoom, slot).
    pub fn slot(&self, zoom: u8, slot: usize) -> Option<&ColumnMap> {
        self.slots.get(slot)?.get(zoom as usize)
    }

    /// Column maps of every used slot at `zoom`, in slot order.
    pub fn slots_at_zoom(&self, zoom: u8) -> impl Iterator<Item = &ColumnMap> + '_ {
        self.slots
            .iter()
            .filter_map(move |zooms| zooms.get(zoom as usize))
    }

    /// Exchanges rejected for a size outside the tile domain.
    pub fn out_of_range(&self) -> usize {
        self.out_of_range
    }

    /// Exchanges rejected because the slots were exhausted.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn open_slot(&mut self) -> Option<usize> {
        if self.is_full() {
            self.dropped += 1;
            if !self.cap_warned {
                warn!(
                    max_samples = self.max_samples,
                    "Cannot add new matches, sample limit reached"
                );
                self.cap_warned = true;
            }
            return None;
        }
        self.slots
            .push(vec![ColumnMap::new(); self.zoom_levels as usize]);
        Some(self.slots.len() - 1)
    }

    fn record(&mut self, slot: usize, zoom: u8, x: u32, y: u32) -> bool {
        let Some(columns) = self
            .slots
            .get_mut(slot)
            .and_then(|zooms| zooms.get_mut(zoom as usize))
        else {
            return false;
        };
        columns.entry(x).or_default().insert(y);
        self.seen_columns.insert(x);
        true
    }
}

/// Looks up exchanges in the profile and fills a [`CandidateTable`].
#[derive(Debug, Clone, Copy)]
pub struct CandidateMatcher<'a> {
    profile: &'a ProfileStore,
    config: &'a AnalysisConfig,
}

impl<'a> CandidateMatcher<'a> {
    pub fn new(profile: &'a ProfileStore, config: &'a AnalysisConfig) -> Self {
        Self { profile, config }
    }

    /// A fresh table sized for one window.
    pub fn new_table(&self) -> CandidateTable {
        CandidateTable::new(self.config.max_samples, self.config.zoom_levels)
    }

    /// Record every profile tile whose size is within tolerance of the
    /// exchange's response size.
    pub fn add(&self, table: &mut CandidateTable, exchange: &Exchange) -> AddOutcome {
        let size = exchange.response_size;
        if !self.config.accepts_size(size) {
            table.out_of_range += 1;
            trace!(size, "Ignoring response outside tile range");
            return AddOutcome::OutOfRange;
        }

        let Some(slot) = table.open_slot() else {
            return AddOutcome::CapReached;
        };

        let mut candidates = 0;
        for (_, tile) in self.profile.candidates_in(self.config.search_range(size)) {
            if !tile.is_in_bounds() {
                continue;
            }
            if table.record(slot, tile.zoom, tile.x, tile.y) {
                candidates += 1;
            }
        }

        trace!(size, slot, candidates, "Exchange matched against profile");
        AddOutcome::Added { slot, candidates }
    }
}
