//! Flow-level traffic shaping.
//!
//! Drained record totals from each direction of a flow become directional
//! [`Burst`]s, and each server burst is paired with the preceding client
//! burst of the same flow to form an [`Exchange`].
//!
//! ```
//! use std::net::Ipv4Addr;
//! use tilesnoop::flow::{BurstExtractor, BurstState, Direction, ExchangeMatcher, FlowKey};
//!
//! let flow = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), 50000, Ipv4Addr::new(10, 0, 0, 1), 443);
//! let extractor = BurstExtractor::new(true);
//! let mut state = BurstState::new();
//! let mut matcher = ExchangeMatcher::default();
//!
//! assert!(extractor.observe(&mut state, flow, Direction::ClientToServer, 300, 1).is_none());
//! let request = extractor
//!     .observe(&mut state, flow, Direction::ServerToClient, 8000, 1)
//!     .unwrap();
//! assert!(matcher.on_burst(&request).is_none());
//!
//! let response = extractor.finish(&mut state, flow).unwrap();
//! let exchange = matcher.on_burst(&response).unwrap();
//! assert_eq!((exchange.request_size, exchange.response_size), (300, 8000));
//! ```

mod burst;
mod exchange;
mod key;

pub use burst::{Burst, BurstExtractor, BurstState};
pub use exchange::{Exchange, ExchangeMatcher, DEFAULT_FLOW_BUCKETS, DEFAULT_HISTORY_PER_BUCKET};
pub use key::{Direction, FlowKey};
