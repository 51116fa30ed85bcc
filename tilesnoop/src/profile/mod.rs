//! Tile size profiles.
//!
//! A profile maps the byte size of every cached tile image to the tiles of
//! that size. It is built offline by scanning a local tile cache around a
//! location, saved in a compact binary file, and loaded once by the
//! analyzer.

mod io;
mod scan;
mod store;

pub use io::{decode, encode, load, save, PROFILE_BUCKETS};
pub use scan::{
    ProfileBuilder, ScanStats, TileCache, CACHE_MARKER, DEFAULT_CACHE_DIR, DEFAULT_PROFILE_FILE,
};
pub use store::ProfileStore;

use std::path::PathBuf;

use thiserror::Error;

use crate::coord::CoordError;

/// Errors from profile building and I/O.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to access profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Profile is truncated in bucket {bucket}")]
    Truncated { bucket: u32 },

    #[error("No tile cache at {0} (missing gmapcatcher.conf)")]
    MissingCacheMarker(PathBuf),

    #[error("Cannot determine home directory for the default tile cache")]
    NoHomeDirectory,

    #[error("Invalid scan location: {0}")]
    Coord(#[from] CoordError),
}
