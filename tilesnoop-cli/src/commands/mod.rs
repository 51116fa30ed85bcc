//! Subcommand implementations.

pub mod analyze;
pub mod build_profile;
