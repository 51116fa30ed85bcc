//! Exchange matching.
//!
//! Client bursts are remembered in a fixed number of hash buckets, each
//! holding a bounded history. A server burst pairs with the most recent
//! client burst of the same flow that has not already been paired.

use std::collections::VecDeque;

use tracing::{trace, warn};

use super::burst::Burst;
use super::key::FlowKey;

/// Default number of history buckets.
pub const DEFAULT_FLOW_BUCKETS: usize = 1009;

/// Default client bursts remembered per bucket.
pub const DEFAULT_HISTORY_PER_BUCKET: usize = 64;

/// A matched request/response burst pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// Seconds timestamp of the response burst.
    pub timestamp: u64,
    pub request_size: u32,
    pub response_size: u32,
    /// Hash of the flow the pair came from. Not carried over the channel;
    /// decoded exchanges have `flow_id == 0`.
    pub flow_id: u32,
}

impl Exchange {
    pub fn new(timestamp: u64, request_size: u32, response_size: u32) -> Self {
        Self {
            timestamp,
            request_size,
            response_size,
            flow_id: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRequest {
    flow: FlowKey,
    len: usize,
    consumed: bool,
}

/// Pairs client and server bursts into [`Exchange`]s.
#[derive(Debug)]
pub struct ExchangeMatcher {
    buckets: Vec<VecDeque<PendingRequest>>,
    per_bucket: usize,
    matched: u64,
    unmatched: u64,
}

impl Default for ExchangeMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW_BUCKETS, DEFAULT_HISTORY_PER_BUCKET)
    }
}

impl ExchangeMatcher {
    /// Create a matcher with `buckets` history buckets of `per_bucket`
    /// entries each. Zero values are raised to one.
    pub fn new(buckets: usize, per_bucket: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets: (0..buckets).map(|_| VecDeque::new()).collect(),
            per_bucket: per_bucket.max(1),
            matched: 0,
            unmatched: 0,
        }
    }

    /// Feed one burst. Server bursts may complete an exchange.
    pub fn on_burst(&mut self, burst: &Burst) -> Option<Exchange> {
        let index = burst.flow.bucket(self.buckets.len());
        let per_bucket = self.per_bucket;
        let history = &mut self.buckets[index];

        if burst.direction.is_client() {
            if history.len() == per_bucket {
                // Oldest request is forgotten
                history.pop_front();
            }
            history.push_back(PendingRequest {
                flow: burst.flow,
                len: burst.len,
                consumed: false,
            });
            return None;
        }

        let request = history
            .iter_mut()
            .rev()
            .find(|pending| !pending.consumed && pending.flow == burst.flow);

        let Some(request) = request else {
            self.unmatched += 1;
            trace!(flow = %burst.flow, len = burst.len, "Response without request");
            return None;
        };
        request.consumed = true;

        let exchange = Exchange {
            timestamp: burst.timestamp,
            request_size: saturate(request.len),
            response_size: saturate(burst.len),
            flow_id: burst.flow.flow_hash(),
        };
        self.matched += 1;
        trace!(
            flow = %burst.flow,
            request = exchange.request_size,
            response = exchange.response_size,
            incomplete = burst.incomplete,
            "Exchange matched"
        );
        Some(exchange)
    }

    /// Drop remembered requests of a closed flow.
    pub fn forget_flow(&mut self, flow: &FlowKey) {
        let index = flow.bucket(self.buckets.len());
        self.buckets[index].retain(|pending| pending.flow != *flow);
    }

    /// Exchanges formed so far.
    pub fn matched(&self) -> u64 {
        self.matched
    }

    /// Server bursts that found no request to pair with.
    pub fn unmatched(&self) -> u64 {
        self.unmatched
    }
}

fn saturate(len: usize) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| {
        warn!(len, "Burst length exceeds 32 bits, saturating");
        u32::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Direction;
    use std::net::Ipv4Addr;

    fn flow(port: u16) -> FlowKey {
        FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), port, Ipv4Addr::new(10, 0, 0, 1), 443)
    }

    fn burst(flow: FlowKey, direction: Direction, len: usize, timestamp: u64) -> Burst {
        Burst {
            flow,
            direction,
            len,
            timestamp,
            incomplete: false,
        }
    }

    #[test]
    fn test_request_then_response_forms_exchange() {
        let mut matcher = ExchangeMatcher::default();
        let f = flow(50000);

        assert!(matcher
            .on_burst(&burst(f, Direction::ClientToServer, 420, 10))
            .is_none());
        let exchange = matcher
            .on_burst(&burst(f, Direction::ServerToClient, 7300, 11))
            .unwrap();

        assert_eq!(exchange.timestamp, 11);
        assert_eq!(exchange.request_size, 420);
        assert_eq!(exchange.response_size, 7300);
        assert_eq!(exchange.flow_id, f.flow_hash());
        assert_eq!(matcher.matched(), 1);
    }

    #[test]
    fn test_consumed_request_does_not_pair_twice() {
        let mut matcher = ExchangeMatcher::default();
        let f = flow(50000);

        matcher.on_burst(&burst(f, Direction::ClientToServer, 420, 10));
        assert!(matcher
            .on_burst(&burst(f, Direction::ServerToClient, 7300, 11))
            .is_some());
        assert!(matcher
            .on_burst(&burst(f, Direction::ServerToClient, 6100, 11))
            .is_none());
        assert_eq!(matcher.unmatched(), 1);
    }

    #[test]
    fn test_response_pairs_with_nearest_request() {
        let mut matcher = ExchangeMatcher::default();
        let f = flow(50000);

        matcher.on_burst(&burst(f, Direction::ClientToServer, 100, 1));
        matcher.on_burst(&burst(f, Direction::ClientToServer, 200, 1));

        let first = matcher
            .on_burst(&burst(f, Direction::ServerToClient, 5000, 2))
            .unwrap();
        assert_eq!(first.request_size, 200);
        let second = matcher
            .on_burst(&burst(f, Direction::ServerToClient, 6000, 2))
            .unwrap();
        assert_eq!(second.request_size, 100);
    }

    #[test]
    fn test_colliding_flows_do_not_mix() {
        // A single bucket forces every flow to collide
        let mut matcher = ExchangeMatcher::new(1, 16);
        let a = flow(50000);
        let b = flow(50001);

        matcher.on_burst(&burst(a, Direction::ClientToServer, 111, 1));
        assert!(matcher
            .on_burst(&burst(b, Direction::ServerToClient, 5000, 2))
            .is_none());

        matcher.on_burst(&burst(b, Direction::ClientToServer, 222, 2));
        let exchange = matcher
            .on_burst(&burst(a, Direction::ServerToClient, 6000, 3))
            .unwrap();
        assert_eq!(exchange.request_size, 111);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut matcher = ExchangeMatcher::new(1, 2);
        let old = flow(40000);
        let f = flow(50000);

        matcher.on_burst(&burst(old, Direction::ClientToServer, 1, 1));
        matcher.on_burst(&burst(f, Direction::ClientToServer, 2, 1));
        matcher.on_burst(&burst(f, Direction::ClientToServer, 3, 1));

        assert!(matcher
            .on_burst(&burst(old, Direction::ServerToClient, 5000, 2))
            .is_none());
    }

    #[test]
    fn test_forget_flow() {
        let mut matcher = ExchangeMatcher::default();
        let f = flow(50000);

        matcher.on_burst(&burst(f, Direction::ClientToServer, 420, 10));
        matcher.forget_flow(&f);
        assert!(matcher
            .on_burst(&burst(f, Direction::ServerToClient, 7300, 11))
            .is_none());
    }
}
