//! Size-indexed tile database.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::coord::TileCoordinate;

/// Mapping from cached tile image size to every tile of that size.
///
/// Built once, either from a tile cache scan or a profile file, and then
/// only read. Sizes iterate in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileStore {
    by_size: BTreeMap<u32, Vec<TileCoordinate>>,
    entries: usize,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tile of `size` bytes. Duplicates are kept.
    pub fn insert(&mut self, size: u32, tile: TileCoordinate) {
        self.by_size.entry(size).or_default().push(tile);
        self.entries += 1;
    }

    /// Append every entry of `other`.
    pub fn merge(&mut self, other: ProfileStore) {
        for (size, tiles) in other.by_size {
            self.entries += tiles.len();
            self.by_size.entry(size).or_default().extend(tiles);
        }
    }

    /// Tiles of exactly `size` bytes.
    pub fn get(&self, size: u32) -> &[TileCoordinate] {
        self.by_size.get(&size).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every `(size, tile)` pair with size inside `range`, ascending by size.
    pub fn candidates_in(
        &self,
        range: RangeInclusive<u32>,
    ) -> impl Iterator<Item = (u32, &TileCoordinate)> + '_ {
        self.by_size
            .range(range)
            .flat_map(|(&size, tiles)| tiles.iter().map(move |tile| (size, tile)))
    }

    /// Distinct sizes with their tiles, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[TileCoordinate])> + '_ {
        self.by_size
            .iter()
            .map(|(&size, tiles)| (size, tiles.as_slice()))
    }

    /// Total entries across all sizes.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of distinct sizes.
    pub fn size_count(&self) -> usize {
        self.by_size.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_in_range() {
        let mut store = ProfileStore::new();
        store.insert(5000, TileCoordinate::new(1, 1, 3));
        store.insert(5010, TileCoordinate::new(2, 1, 3));
        store.insert(7000, TileCoordinate::new(3, 1, 3));

        let found: Vec<u32> = store.candidates_in(4990..=5010).map(|(s, _)| s).collect();
        assert_eq!(found, vec![5000, 5010]);
        assert_eq!(store.candidates_in(6000..=6999).count(), 0);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut store = ProfileStore::new();
        let tile = TileCoordinate::new(4, 4, 4);
        store.insert(3000, tile);
        store.insert(3000, tile);
        assert_eq!(store.get(3000), &[tile, tile]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.size_count(), 1);
    }

    #[test]
    fn test_merge_appends() {
        let mut a = ProfileStore::new();
        a.insert(3000, TileCoordinate::new(1, 1, 5));
        let mut b = ProfileStore::new();
        b.insert(3000, TileCoordinate::new(2, 2, 5));
        b.insert(4000, TileCoordinate::new(3, 3, 5));

        a.merge(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(3000).len(), 2);
        assert!(a.get(9999).is_empty());
    }
}
