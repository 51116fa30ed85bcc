//! analyze command - capture tile traffic and print location estimates.

use std::sync::Arc;

use tilesnoop::analyzer::{AnalysisMode, Analyzer, AnalyzerError, RunOutcome, WindowReport};
use tilesnoop::capture::{run_capture, LiveSource, OfflineSource, PacketSource};
use tilesnoop::channel::frame_channel;
use tilesnoop::config::Settings;
use tilesnoop::hosts::ServerAllowList;
use tilesnoop::privdrop::drop_privileges;
use tilesnoop::profile;
use console::Style;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CliError;
use crate::AnalyzeArgs;

/// Run the analyze command.
pub fn run(args: AnalyzeArgs) -> Result<(), CliError> {
    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let store = profile::load(&args.file)?;
    info!(
        path = %args.file.display(),
        entries = store.len(),
        sizes = store.size_count(),
        "Profile loaded"
    );
    let store = Arc::new(store);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(format!("Failed to create Tokio runtime: {}", e)))?;

    let port = settings.capture.server_port;
    let allow = match &args.ip_list {
        Some(path) => ServerAllowList::from_file(path, port)?,
        None => runtime.block_on(ServerAllowList::resolve_tile_hosts(port))?,
    };
    info!(servers = allow.len(), "Following tile servers");
    for server in allow.servers() {
        debug!(%server, "Server");
    }

    let (source, mode): (Box<dyn PacketSource>, AnalysisMode) = match (&args.live, &args.offline) {
        (Some(device), _) => (
            Box::new(LiveSource::open(device, &allow.bpf_expression())?),
            AnalysisMode::Live,
        ),
        (None, Some(path)) => (Box::new(OfflineSource::open(path)?), AnalysisMode::Offline),
        (None, None) => {
            return Err(CliError::Usage(
                "Either a live interface or a capture file is required".to_string(),
            ))
        }
    };
    info!(source = %source.describe(), "Capture opened");

    // Privileges are only needed to open the device
    if let Some(user) = &args.user {
        drop_privileges(user)?;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Received interrupt, shutting down...");
            cancel.cancel();
        })
        .map_err(|e| CliError::Runtime(format!("Failed to set signal handler: {}", e)))?;
    }

    let (sender, receiver) = frame_channel(settings.capture.channel_depth);
    let analyzer = Analyzer::new(store, settings.analysis.clone(), mode);
    let capture_config = settings.capture.clone();
    let color = args.color;

    let outcome = runtime.block_on(async {
        let capture = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                run_capture(source, allow, &capture_config, sender, cancel)
            })
        };

        let result = analyzer
            .run(receiver, cancel.clone(), |report| print_report(&report, color))
            .await;

        // Stop the capture side whatever ended the analysis
        cancel.cancel();
        let captured = capture
            .await
            .map_err(|e| CliError::Runtime(format!("Capture task panicked: {}", e)))?;

        match (result, captured) {
            (Err(AnalyzerError::CaptureTerminated), Err(e)) => Err(CliError::Capture(e)),
            (Err(e), _) => Err(CliError::Analyzer(e)),
            (Ok(_), Err(e)) => Err(CliError::Capture(e)),
            (Ok(outcome), Ok(summary)) => {
                debug!(?summary, "Capture summary");
                Ok(outcome)
            }
        }
    })?;

    if outcome == RunOutcome::Interrupted {
        info!("Interrupted, last window discarded");
    }
    Ok(())
}

/// Format the estimate line of a window, `None` when nothing was inferred.
fn estimate_line(report: &WindowReport, color: bool) -> Option<String> {
    let estimate = report.estimate.as_ref()?;
    let marker = Style::new().green().bold().force_styling(color);
    Some(format!(
        "{} Lat: {:.6}, Lng: {:.6}  (window {}, {} exchanges, {} rectangles)",
        marker.apply_to("[+]"),
        estimate.lat,
        estimate.lon,
        report.start,
        report.exchanges,
        estimate.rectangles
    ))
}

fn print_report(report: &WindowReport, color: bool) {
    match estimate_line(report, color) {
        Some(line) => println!("{}", line),
        None => info!(
            start = report.start,
            exchanges = report.exchanges,
            "No location inferred"
        ),
    }
    for rect in &report.rectangles {
        debug!(
            zoom = rect.zoom,
            x = %format!("{}..={}", rect.x_lo, rect.x_hi),
            y = %format!("{}..={}", rect.y_lo, rect.y_hi),
            lat = rect.lat,
            lon = rect.lon,
            "Rectangle"
        );
    }
}
