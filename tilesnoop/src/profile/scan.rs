//! Profile building from a local tile cache.
//!
//! The cache follows the gmapcatcher layout: one PNG per tile at
//! `sat_tiles/{z}/{x/1024}/{x%1024}/{y/1024}/{y%1024}.png` below a root
//! directory that also holds a `gmapcatcher.conf` marker file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, trace};

use super::{ProfileError, ProfileStore};
use crate::config::ProfileScanConfig;
use crate::coord::{coord_to_tile, tiles_per_axis, TileCoordinate, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};

/// File whose presence identifies a tile cache root.
pub const CACHE_MARKER: &str = "gmapcatcher.conf";

/// Cache directory below the home directory.
pub const DEFAULT_CACHE_DIR: &str = ".googlemaps";

/// Default profile file name, relative to the working directory.
pub const DEFAULT_PROFILE_FILE: &str = "gmaps_profile.dat";

/// Subdirectory holding satellite tiles.
const TILE_SUBDIR: &str = "sat_tiles";

/// Largest latitude span queried, in degrees.
const MAX_LAT_SPAN: f64 = 170.0;

/// Largest longitude span queried, in degrees.
const MAX_LON_SPAN: f64 = 358.0;

/// A verified tile cache directory.
#[derive(Debug, Clone)]
pub struct TileCache {
    root: PathBuf,
}

impl TileCache {
    /// Open the cache at `root`, which must contain the marker file.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let root = root.into();
        if !root.join(CACHE_MARKER).is_file() {
            return Err(ProfileError::MissingCacheMarker(root));
        }
        Ok(Self { root })
    }

    /// The default cache location, `$HOME/.googlemaps`.
    pub fn default_root() -> Result<PathBuf, ProfileError> {
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_CACHE_DIR))
            .ok_or(ProfileError::NoHomeDirectory)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a tile image inside the cache.
    pub fn tile_path(&self, tile: &TileCoordinate) -> PathBuf {
        self.root
            .join(TILE_SUBDIR)
            .join(tile.zoom.to_string())
            .join((tile.x / 1024).to_string())
            .join((tile.x % 1024).to_string())
            .join((tile.y / 1024).to_string())
            .join(format!("{}.png", tile.y % 1024))
    }

    /// Size of a cached tile image, or `None` when it is not cached.
    pub fn tile_size(&self, tile: &TileCoordinate) -> Option<u64> {
        fs::metadata(self.tile_path(tile)).ok().map(|m| m.len())
    }
}

/// Found/missing tile counts of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub found: usize,
    pub missing: usize,
}

impl ScanStats {
    pub fn total(&self) -> usize {
        self.found + self.missing
    }
}

/// Collects cached tile sizes into a [`ProfileStore`].
#[derive(Debug)]
pub struct ProfileBuilder {
    cache: TileCache,
    store: ProfileStore,
    stats: ScanStats,
}

impl ProfileBuilder {
    /// Start with an empty profile.
    pub fn new(cache: TileCache) -> Self {
        Self::with_store(cache, ProfileStore::new())
    }

    /// Start from an existing profile; new entries are appended.
    pub fn with_store(cache: TileCache, store: ProfileStore) -> Self {
        Self {
            cache,
            store,
            stats: ScanStats::default(),
        }
    }

    /// Scan the tile rectangle `[xmin, xmax] × [ymin, ymax]` at `zoom`.
    ///
    /// Ranges wrap around the world edge when `max < min`, and collapse to
    /// the whole axis when they are at least a world wide.
    pub fn query_region(&mut self, xmin: u32, xmax: u32, ymin: u32, ymax: u32, zoom: u8) {
        let world = tiles_per_axis(zoom);
        let (xmin, x_count) = axis_span(xmin, xmax, world);
        let (ymin, y_count) = axis_span(ymin, ymax, world);

        for i in 0..x_count {
            let x = (xmin + i) % world;
            for j in 0..y_count {
                let y = (ymin + j) % world;
                let tile = TileCoordinate::new(x, y, zoom);
                self.probe(tile);
            }
        }
    }

    /// Scan the tiles covering a `dlat × dlon` box centred on a location.
    pub fn query_region_around_location(
        &mut self,
        lat: f64,
        lon: f64,
        dlat: f64,
        dlon: f64,
        zoom: u8,
    ) -> Result<(), ProfileError> {
        let (lat, dlat) = if dlat > MAX_LAT_SPAN {
            (0.0, MAX_LAT_SPAN)
        } else {
            (lat, dlat)
        };
        let (lon, dlon) = if dlon > MAX_LON_SPAN {
            (0.0, MAX_LON_SPAN)
        } else {
            (lon, dlon)
        };

        let north = (lat + dlat / 2.0).clamp(MIN_LAT, MAX_LAT);
        let south = (lat - dlat / 2.0).clamp(MIN_LAT, MAX_LAT);
        let west = wrap_lon(lon - dlon / 2.0);
        let east = wrap_lon(lon + dlon / 2.0);

        let (top_left, _) = coord_to_tile(north, west, zoom)?;
        let (bottom_right, _) = coord_to_tile(south, east, zoom)?;

        self.query_region(top_left.x, bottom_right.x, top_left.y, bottom_right.y, zoom);
        Ok(())
    }

    /// Scan every configured zoom level around a location.
    pub fn scan_location(
        &mut self,
        lat: f64,
        lon: f64,
        config: &ProfileScanConfig,
    ) -> Result<ScanStats, ProfileError> {
        let span = config.half_range * 2.0;
        for zoom in config.zoom_levels() {
            let before = self.stats;
            self.query_region_around_location(lat, lon, span, span, zoom)?;
            info!(
                zoom,
                found = self.stats.found - before.found,
                missing = self.stats.missing - before.missing,
                "Scanned zoom level"
            );
        }
        Ok(self.stats)
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Finish and return the collected profile.
    pub fn into_store(self) -> ProfileStore {
        self.store
    }

    fn probe(&mut self, tile: TileCoordinate) {
        match self.cache.tile_size(&tile) {
            Some(size) => {
                trace!(tile = %tile, size, "Found");
                let size = u32::try_from(size).unwrap_or(u32::MAX);
                self.store.insert(size, tile);
                self.stats.found += 1;
            }
            None => {
                trace!(tile = %tile, "Missing");
                self.stats.missing += 1;
            }
        }
    }
}

/// Start and length of an axis range on a wrapping grid.
fn axis_span(min: u32, max: u32, world: u32) -> (u32, u32) {
    if max.saturating_sub(min) >= world {
        return (0, world);
    }
    let (min, max) = (min % world, max % world);
    let count = ((max + world - min) % world) + 1;
    (min, count)
}

fn wrap_lon(lon: f64) -> f64 {
    if lon > MAX_LON {
        lon - 360.0
    } else if lon < MIN_LON {
        lon + 360.0
    } else {
        lon
    }
}
