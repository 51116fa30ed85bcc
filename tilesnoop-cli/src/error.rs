//! CLI error types.

use std::fmt;

use tilesnoop::analyzer::AnalyzerError;
use tilesnoop::capture::CaptureError;
use tilesnoop::config::ConfigError;
use tilesnoop::hosts::HostError;
use tilesnoop::privdrop::PrivDropError;
use tilesnoop::profile::ProfileError;

/// Errors reported by the `tilesnoop` binary.
#[derive(Debug)]
pub enum CliError {
    /// Profile could not be built, read or written.
    Profile(ProfileError),

    /// Capture source failed to open or died.
    Capture(CaptureError),

    /// Server allow-list could not be built.
    Hosts(HostError),

    /// Privilege drop failed.
    PrivDrop(PrivDropError),

    /// Settings file was invalid.
    Config(ConfigError),

    /// Analysis ended with an error.
    Analyzer(AnalyzerError),

    /// Runtime or signal handler setup failed.
    Runtime(String),

    /// Arguments were valid individually but not together.
    Usage(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Profile(e) => write!(f, "Profile error: {}", e),
            CliError::Capture(e) => write!(f, "Capture error: {}", e),
            CliError::Hosts(e) => write!(f, "Server list error: {}", e),
            CliError::PrivDrop(e) => write!(f, "Cannot drop privileges: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Analyzer(e) => write!(f, "Analysis failed: {}", e),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            CliError::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Profile(e) => Some(e),
            CliError::Capture(e) => Some(e),
            CliError::Hosts(e) => Some(e),
            CliError::PrivDrop(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Analyzer(e) => Some(e),
            CliError::Runtime(_) | CliError::Usage(_) => None,
        }
    }
}

impl From<ProfileError> for CliError {
    fn from(e: ProfileError) -> Self {
        CliError::Profile(e)
    }
}

impl From<CaptureError> for CliError {
    fn from(e: CaptureError) -> Self {
        CliError::Capture(e)
    }
}

impl From<HostError> for CliError {
    fn from(e: HostError) -> Self {
        CliError::Hosts(e)
    }
}

impl From<PrivDropError> for CliError {
    fn from(e: PrivDropError) -> Self {
        CliError::PrivDrop(e)
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<AnalyzerError> for CliError {
    fn from(e: AnalyzerError) -> Self {
        CliError::Analyzer(e)
    }
}
