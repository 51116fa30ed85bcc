//! Coordinate conversion module
//!
//! Provides conversions between geographic coordinates (latitude/longitude)
//! and the spherical Mercator tile grid used by the tile cache and the tile
//! servers. The grid counts zoom levels downwards: at [`WORLD_ZOOM`] a single
//! tile covers the world and every lower zoom doubles the tiles per axis.

mod types;

pub use types::{
    CoordError, PixelOffset, TileCoordinate, MAX_LAT, MAX_LON, MAX_X, MAX_Y, MAX_Z, MIN_LAT,
    MIN_LON, TILE_PIXELS, WORLD_ZOOM,
};

use std::f64::consts::PI;

/// Number of tiles along each axis at the given zoom level, `2^(17 - zoom)`.
///
/// Zoom levels above [`WORLD_ZOOM`] saturate at one tile.
#[inline]
pub fn tiles_per_axis(zoom: u8) -> u32 {
    1u32 << (WORLD_ZOOM - zoom.min(WORLD_ZOOM))
}

/// Converts geographic coordinates to a tile plus the pixel offset inside it.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-85.05112878 to 85.05112878)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `zoom` - Zoom level (0 to 17)
///
/// # Returns
///
/// The containing tile and the pixel offset (0..256 on each axis) of the
/// point within that tile, or an error if inputs are invalid.
pub fn coord_to_tile(
    lat: f64,
    lon: f64,
    zoom: u8,
) -> Result<(TileCoordinate, PixelOffset), CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > WORLD_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let world_tiles = tiles_per_axis(zoom);
    let world = world_tiles as f64;

    let x = world / 360.0 * (lon + 180.0);

    // Forward Mercator: y grows southwards from the top edge of the world
    let tiles_per_radian = world / (2.0 * PI);
    let e = (lat * PI / 180.0).sin();
    let y = world / 2.0 - 0.5 * ((1.0 + e) / (1.0 - e)).ln() * tiles_per_radian;

    let offset = PixelOffset {
        px: (x.fract() * TILE_PIXELS as f64) as u32,
        py: (y.fract() * TILE_PIXELS as f64) as u32,
    };
    let tile = TileCoordinate {
        x: (x as u32) % world_tiles,
        y: (y as u32) % world_tiles,
        zoom,
    };

    Ok((tile, offset))
}

/// Converts a tile position back to geographic coordinates.
///
/// `px`/`py` select a pixel inside the tile; `(0, 0)` is the tile's
/// northwest corner and `(128, 128)` its centre.
///
/// # Returns
///
/// A tuple of (latitude, longitude) in degrees.
pub fn tile_to_coord(zoom: u8, x: u32, y: u32, px: u32, py: u32) -> (f64, f64) {
    let half_world = 2.0_f64.powi(WORLD_ZOOM as i32 - zoom as i32) / 2.0;
    let pixels = TILE_PIXELS as f64;

    let nx = (x as f64 + px as f64 / pixels) / half_world - 1.0;
    let ny = (y as f64 + py as f64 / pixels) / half_world - 1.0;

    let lon = nx * 180.0;

    // Inverse Mercator
    let k = (-ny * 2.0 * PI).exp();
    let e = (k - 1.0) / (k + 1.0);
    let lat = e.asin() * 180.0 / PI;

    (lat, lon)
}
