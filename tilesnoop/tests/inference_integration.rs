//! Integration tests for window inference.
//!
//! These tests drive the public analysis API the way the analyzer does:
//! - profile on disk → loaded store → candidate table → rectangles
//! - exchanges over the frame channel → analyzer windows → estimates
//!
//! Run with: `cargo test --test inference_integration`

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tilesnoop::analysis::{analyze_table, block_centre, CandidateMatcher};
use tilesnoop::analyzer::{AnalysisMode, Analyzer, RunOutcome};
use tilesnoop::channel::frame_channel;
use tilesnoop::config::AnalysisConfig;
use tilesnoop::coord::{tile_to_coord, TileCoordinate, MAX_X};
use tilesnoop::flow::Exchange;
use tilesnoop::profile::{self, ProfileStore};

// ============================================================================
// Helper Functions
// ============================================================================

/// Four tiles forming a 2×2 block at zoom 6.
fn block_profile() -> ProfileStore {
    let mut store = ProfileStore::new();
    store.insert(5000, TileCoordinate::new(100, 200, 6));
    store.insert(5010, TileCoordinate::new(100, 201, 6));
    store.insert(5020, TileCoordinate::new(101, 200, 6));
    store.insert(5030, TileCoordinate::new(101, 201, 6));
    store
}

fn block_exchanges(timestamp: u64) -> Vec<Exchange> {
    [5005, 5015, 5005, 5015]
        .into_iter()
        .map(|size| Exchange::new(timestamp, 420, size))
        .collect()
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_block_yields_single_rectangle_at_its_centre() {
    let profile = block_profile();
    let config = AnalysisConfig::default();
    let matcher = CandidateMatcher::new(&profile, &config);
    let mut table = matcher.new_table();
    for exchange in block_exchanges(1) {
        matcher.add(&mut table, &exchange);
    }

    let inference = analyze_table(&table, &config);
    assert_eq!(inference.rectangles.len(), 1);

    let rect = inference.rectangles[0];
    assert_eq!((rect.zoom, rect.x_lo, rect.x_hi, rect.y_lo, rect.y_hi), (6, 100, 101, 200, 201));
    assert_eq!(rect.area(), 4);

    // Even extents: the centre is the corner shared by the four tiles
    let expected = tile_to_coord(6, 101, 201, 0, 0);
    assert_eq!((rect.lat, rect.lon), expected);
    assert_eq!(block_centre(6, 100, 101, 200, 201), expected);

    let estimate = inference.estimate.expect("a location");
    assert_eq!((estimate.lat, estimate.lon), (rect.lat, rect.lon));
    assert_eq!(estimate.rectangles, 1);
}

#[test]
fn test_no_candidates_means_no_location() {
    let profile = block_profile();
    let config = AnalysisConfig::default();
    let matcher = CandidateMatcher::new(&profile, &config);
    let mut table = matcher.new_table();
    matcher.add(&mut table, &Exchange::new(1, 420, 20_000));

    let inference = analyze_table(&table, &config);
    assert!(inference.rectangles.is_empty());
    assert!(inference.estimate.is_none());
}

#[test]
fn test_profile_file_round_trip_drops_out_of_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile.dat");

    let mut store = block_profile();
    store.insert(5000, TileCoordinate::new(MAX_X, 3, 6));
    store.insert(7000, TileCoordinate::new(4, 4, 20));
    profile::save(&store, &path).unwrap();

    let loaded = profile::load(&path).unwrap();
    assert_eq!(loaded, block_profile());
    assert!(loaded.get(7000).is_empty());
}

#[test]
fn test_merge_appends_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile.dat");
    profile::save(&block_profile(), &path).unwrap();

    let mut merged = profile::load(&path).unwrap();
    merged.merge(block_profile());
    profile::save(&merged, &path).unwrap();

    let reloaded = profile::load(&path).unwrap();
    assert_eq!(reloaded.get(5000).len(), 2);
    assert_eq!(reloaded.len(), 8);
}

#[tokio::test]
async fn test_analyzer_over_channel_reports_each_window() {
    let (mut tx, rx) = frame_channel(64);
    let analyzer = Analyzer::new(
        Arc::new(block_profile()),
        AnalysisConfig::default(),
        AnalysisMode::Offline,
    );

    let producer = tokio::spawn(async move {
        for exchange in block_exchanges(1000) {
            tx.send(exchange).await.unwrap();
        }
        for exchange in block_exchanges(1010) {
            tx.send(exchange).await.unwrap();
        }
    });

    let mut reports = Vec::new();
    let outcome = analyzer
        .run(rx, CancellationToken::new(), |report| reports.push(report))
        .await
        .unwrap();
    producer.await.unwrap();

    assert_eq!(outcome, RunOutcome::EndOfInput);
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.exchanges, 4);
        assert_eq!(report.rectangles.len(), 1);
        assert!(report.estimate.is_some());
    }
    assert_eq!(reports[0].start, 1000);
    assert_eq!(reports[1].start, 1010);
}
