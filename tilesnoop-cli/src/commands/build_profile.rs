//! build-profile command - scan a tile cache around a location.

use tilesnoop::config::ProfileScanConfig;
use tilesnoop::profile::{self, ProfileBuilder, TileCache};
use tracing::info;

use crate::error::CliError;
use crate::BuildProfileArgs;

/// Run the build-profile command.
pub fn run(args: BuildProfileArgs) -> Result<(), CliError> {
    let root = match args.cache_dir {
        Some(dir) => dir,
        None => TileCache::default_root()?,
    };
    let cache = TileCache::open(root)?;
    info!(cache = %cache.root().display(), "Using tile cache");

    let mut builder = if args.merge {
        let existing = profile::load(&args.file)?;
        info!(
            path = %args.file.display(),
            entries = existing.len(),
            "Loaded existing profile for merge"
        );
        ProfileBuilder::with_store(cache, existing)
    } else {
        ProfileBuilder::new(cache)
    };

    let stats = builder.scan_location(args.latitude, args.longitude, &ProfileScanConfig::default())?;
    println!(
        "Total tiles: {} (found: {}, missing: {}).",
        stats.total(),
        stats.found,
        stats.missing
    );

    if args.merge {
        println!("Writing out merged profile.");
    } else {
        println!("Writing out profile.");
    }
    profile::save(&builder.into_store(), &args.file)?;
    Ok(())
}
