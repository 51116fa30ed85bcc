//! Coordinate types and validation.

use thiserror::Error;

/// Minimum latitude representable by the spherical Mercator projection.
pub const MIN_LAT: f64 = -85.05112878;

/// Maximum latitude representable by the spherical Mercator projection.
pub const MAX_LAT: f64 = 85.05112878;

/// Minimum longitude.
pub const MIN_LON: f64 = -180.0;

/// Maximum longitude.
pub const MAX_LON: f64 = 180.0;

/// Exclusive upper bound for tile X indices accepted from a profile.
pub const MAX_X: u32 = 200_000;

/// Exclusive upper bound for tile Y indices accepted from a profile.
pub const MAX_Y: u32 = 200_000;

/// Exclusive upper bound for zoom levels (`zoom < MAX_Z`).
pub const MAX_Z: u8 = 20;

/// The zoom level at which a single tile covers the whole world.
pub const WORLD_ZOOM: u8 = 17;

/// Width and height of a tile image in pixels.
pub const TILE_PIXELS: u32 = 256;

/// Errors from coordinate conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("Invalid latitude: {0} (must be between -85.05112878 and 85.05112878)")]
    InvalidLatitude(f64),

    #[error("Invalid longitude: {0} (must be between -180 and 180)")]
    InvalidLongitude(f64),

    #[error("Invalid zoom level: {0} (must be at most 17)")]
    InvalidZoom(u8),
}

/// A tile address in the quad-tree tiling scheme.
///
/// Zoom counts *down* towards detail: zoom 17 is a single world tile and
/// each lower zoom doubles the tile count per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    /// Column, 0 = west.
    pub x: u32,
    /// Row, 0 = north.
    pub y: u32,
    /// Zoom level.
    pub zoom: u8,
}

impl TileCoordinate {
    /// Create a new tile coordinate.
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Whether the coordinate lies inside the accepted index domain.
    ///
    /// Out-of-bounds coordinates are dropped when a profile is loaded.
    pub fn is_in_bounds(&self) -> bool {
        self.x < MAX_X && self.y < MAX_Y && self.zoom < MAX_Z
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})@z{}", self.x, self.y, self.zoom)
    }
}

/// Pixel position inside a tile, each axis in `0..TILE_PIXELS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelOffset {
    pub px: u32,
    pub py: u32,
}

impl PixelOffset {
    pub fn new(px: u32, py: u32) -> Self {
        Self { px, py }
    }
}
