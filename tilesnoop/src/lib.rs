//! tilesnoop - map tile inference from encrypted response sizes
//!
//! Map tiles are small images whose byte sizes vary enough to identify
//! them. Fetching them over TLS hides the content but not the size, so an
//! observer who knows the sizes of the tiles around a place can tell which
//! tiles a client downloads, and from that where the client is looking.
//!
//! The crate is split along the two tasks of a run:
//!
//! - **Capture** ([`capture`], [`tls`], [`flow`]): packets are reassembled
//!   into TCP streams, TLS record framing recovers per-direction
//!   application-data totals, and request/response bursts are paired into
//!   [`flow::Exchange`]s sent over the [`channel`].
//! - **Analysis** ([`analyzer`], [`analysis`]): exchanges are collected in
//!   time windows, matched against a [`profile::ProfileStore`] of known tile
//!   sizes, and recurring contiguous blocks of candidate tiles are reduced
//!   to a location estimate.
//!
//! [`profile::ProfileBuilder`] builds the profile from a local tile cache.

pub mod analysis;
pub mod analyzer;
pub mod capture;
pub mod channel;
pub mod config;
pub mod coord;
pub mod flow;
pub mod hosts;
pub mod privdrop;
pub mod profile;
pub mod tls;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
