//! Binary profile file.
//!
//! The file holds exactly [`PROFILE_BUCKETS`] buckets, one per possible tile
//! size, in ascending order. All integers are big-endian.
//!
//! ```text
//! bucket := index:u16 count:u32 entry{count}
//! entry  := x:u32 y:u32 zoom:u8
//! ```

use std::fs;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, warn};

use super::{ProfileError, ProfileStore};
use crate::coord::TileCoordinate;

/// Bucket count, the smallest prime above the largest expected tile size.
pub const PROFILE_BUCKETS: u32 = 30727;

const BUCKET_HEADER_LEN: usize = 2 + 4;
const ENTRY_LEN: usize = 4 + 4 + 1;

/// Load a profile file.
///
/// Entries outside the coordinate domain are skipped, not rejected.
pub fn load(path: &Path) -> Result<ProfileStore, ProfileError> {
    let data = fs::read(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let store = decode(&data)?;
    debug!(
        path = %path.display(),
        entries = store.len(),
        sizes = store.size_count(),
        "Profile loaded"
    );
    Ok(store)
}

/// Write `store` to `path`, replacing any existing file.
pub fn save(store: &ProfileStore, path: &Path) -> Result<(), ProfileError> {
    let data = encode(store);
    fs::write(path, &data).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode a profile held in memory.
pub fn decode(mut data: &[u8]) -> Result<ProfileStore, ProfileError> {
    let mut store = ProfileStore::new();
    let mut skipped = 0usize;

    for bucket in 0..PROFILE_BUCKETS {
        if data.remaining() < BUCKET_HEADER_LEN {
            return Err(ProfileError::Truncated { bucket });
        }
        let index = data.get_u16();
        let count = data.get_u32();

        if data.remaining() < count as usize * ENTRY_LEN {
            return Err(ProfileError::Truncated { bucket });
        }
        for _ in 0..count {
            let tile = TileCoordinate {
                x: data.get_u32(),
                y: data.get_u32(),
                zoom: data.get_u8(),
            };
            if tile.is_in_bounds() {
                store.insert(index as u32, tile);
            } else {
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        debug!(skipped, "Skipped out-of-range profile entries");
    }
    if data.has_remaining() {
        warn!(trailing = data.remaining(), "Ignoring trailing bytes after profile");
    }
    Ok(store)
}

/// Encode `store` into the file format.
///
/// Sizes at or above [`PROFILE_BUCKETS`] have no bucket and are dropped.
pub fn encode(store: &ProfileStore) -> BytesMut {
    let mut buf = BytesMut::with_capacity(
        PROFILE_BUCKETS as usize * BUCKET_HEADER_LEN + store.len() * ENTRY_LEN,
    );

    for bucket in 0..PROFILE_BUCKETS {
        let tiles = store.get(bucket);
        buf.put_u16((bucket & 0xFFFF) as u16);
        buf.put_u32(tiles.len() as u32);
        for tile in tiles {
            buf.put_u32(tile.x);
            buf.put_u32(tile.y);
            buf.put_u8(tile.zoom);
        }
    }

    let dropped: usize = store
        .iter()
        .filter(|(size, _)| *size >= PROFILE_BUCKETS)
        .map(|(_, tiles)| tiles.len())
        .sum();
    if dropped > 0 {
        warn!(
            dropped,
            max_size = PROFILE_BUCKETS - 1,
            "Tiles too large for the profile format were not written"
        );
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_file() -> BytesMut {
        encode(&ProfileStore::new())
    }

    #[test]
    fn test_empty_profile_layout() {
        let buf = empty_file();
        assert_eq!(buf.len(), PROFILE_BUCKETS as usize * BUCKET_HEADER_LEN);
        // Bucket 1 header
        assert_eq!(&buf[6..12], &[0, 1, 0, 0, 0, 0]);
        assert!(decode(&buf).unwrap().is_empty());
    }

    #[test]
    fn test_entry_encoding() {
        let mut store = ProfileStore::new();
        store.insert(2, TileCoordinate::new(0x0102_0304, 7, 9));
        let buf = encode(&store);

        let bucket_two = 2 * BUCKET_HEADER_LEN;
        assert_eq!(
            &buf[bucket_two..bucket_two + BUCKET_HEADER_LEN + ENTRY_LEN],
            &[0, 2, 0, 0, 0, 1, 1, 2, 3, 4, 0, 0, 0, 7, 9]
        );
    }

    #[test]
    fn test_out_of_bounds_entries_are_skipped() {
        let mut store = ProfileStore::new();
        store.insert(5000, TileCoordinate::new(10, 10, 5));
        store.insert(5000, TileCoordinate::new(200_000, 10, 5));
        store.insert(5000, TileCoordinate::new(10, 200_000, 5));
        store.insert(5001, TileCoordinate::new(10, 10, 20));

        let loaded = decode(&encode(&store)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(5000), &[TileCoordinate::new(10, 10, 5)]);
        assert!(loaded.get(5001).is_empty());
    }

    #[test]
    fn test_oversized_tiles_are_not_written() {
        let mut store = ProfileStore::new();
        store.insert(PROFILE_BUCKETS, TileCoordinate::new(1, 1, 1));
        store.insert(PROFILE_BUCKETS - 1, TileCoordinate::new(2, 2, 1));

        let loaded = decode(&encode(&store)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(PROFILE_BUCKETS - 1).len(), 1);
    }

    #[test]
    fn test_truncated_file() {
        let buf = empty_file();
        let err = decode(&buf[..buf.len() - 1]).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::Truncated {
                bucket
            } if bucket == PROFILE_BUCKETS - 1
        ));
    }

    #[test]
    fn test_truncated_entries() {
        let mut buf = BytesMut::new();
        buf.put_u16(0);
        buf.put_u32(3);
        buf.put_slice(&[0; ENTRY_LEN]);
        assert!(matches!(
            decode(&buf),
            Err(ProfileError::Truncated { bucket: 0 })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = load(Path::new("/nonexistent/profile.dat")).unwrap_err();
        assert!(matches!(err, ProfileError::Io { .. }));
    }
}
