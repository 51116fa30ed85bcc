//! tilesnoop CLI - Command-line interface
//!
//! `build-profile` scans a local tile cache into a size profile;
//! `analyze` watches tile traffic and prints location estimates.

mod commands;
mod error;
mod logging;

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use tilesnoop::profile::DEFAULT_PROFILE_FILE;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "tilesnoop")]
#[command(author, version, about = "Infer viewed map tiles from encrypted response sizes")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tile size profile from a local tile cache
    BuildProfile(BuildProfileArgs),

    /// Capture tile traffic and estimate the viewed location
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
pub struct BuildProfileArgs {
    /// Latitude to scan around
    #[arg(short = 'a', long, allow_negative_numbers = true)]
    pub latitude: f64,

    /// Longitude to scan around
    #[arg(short = 'o', long, allow_negative_numbers = true)]
    pub longitude: f64,

    /// Merge into an existing profile file instead of overwriting it
    #[arg(short, long)]
    pub merge: bool,

    /// Tile cache directory [default: ~/.googlemaps]
    #[arg(short = 'd', long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// Profile file to write
    #[arg(short, long, default_value = DEFAULT_PROFILE_FILE)]
    pub file: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["live", "offline"])))]
pub struct AnalyzeArgs {
    /// Capture live on this network interface
    #[arg(short = 'L', long)]
    pub live: Option<String>,

    /// Replay this capture file
    #[arg(short = 'O', long)]
    pub offline: Option<PathBuf>,

    /// Tile size profile
    #[arg(short, long, default_value = DEFAULT_PROFILE_FILE)]
    pub file: PathBuf,

    /// File with one tile server IPv4 address per line [default: resolve tile hosts]
    #[arg(short = 'i', long = "iplist")]
    pub ip_list: Option<PathBuf>,

    /// Drop privileges to this user once the capture is open
    #[arg(short, long)]
    pub user: Option<String>,

    /// Settings file overriding analysis and capture defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Colored log output
    #[arg(short, long)]
    pub color: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Commands::BuildProfile(args) => {
            logging::init(args.verbose, false);
            commands::build_profile::run(args)
        }
        Commands::Analyze(args) => {
            logging::init(args.verbose, args.color);
            commands::analyze::run(args)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
