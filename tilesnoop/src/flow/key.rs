//! Flow identity.

use std::fmt;
use std::net::Ipv4Addr;

/// Which side of a flow sent a piece of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server (requests).
    ClientToServer,
    /// Server to client (responses).
    ServerToClient,
}

impl Direction {
    /// Whether this is the request direction.
    pub fn is_client(self) -> bool {
        self == Direction::ClientToServer
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => write!(f, "c->s"),
            Direction::ServerToClient => write!(f, "s->c"),
        }
    }
}

/// The 4-tuple identifying one TCP connection, oriented client first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
}

impl FlowKey {
    pub fn new(client_ip: Ipv4Addr, client_port: u16, server_ip: Ipv4Addr, server_port: u16) -> Self {
        Self {
            client_ip,
            client_port,
            server_ip,
            server_port,
        }
    }

    /// 32-bit FNV-1a hash of the 4-tuple.
    ///
    /// Distinct flows may share a hash; callers comparing history must
    /// still compare the full key.
    pub fn flow_hash(&self) -> u32 {
        const OFFSET: u32 = 0x811c_9dc5;
        const PRIME: u32 = 0x0100_0193;

        let mut hash = OFFSET;
        let bytes = self
            .client_ip
            .octets()
            .into_iter()
            .chain(self.client_port.to_be_bytes())
            .chain(self.server_ip.octets())
            .chain(self.server_port.to_be_bytes());
        for byte in bytes {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(PRIME);
        }
        hash
    }

    /// History bucket for this flow among `buckets` buckets.
    pub fn bucket(&self, buckets: usize) -> usize {
        self.flow_hash() as usize % buckets.max(1)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{}) - ({}:{})",
            self.client_ip, self.client_port, self.server_ip, self.server_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(port: u16) -> FlowKey {
        FlowKey::new(
            Ipv4Addr::new(192, 168, 1, 10),
            port,
            Ipv4Addr::new(142, 250, 74, 14),
            443,
        )
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(key(50000).flow_hash(), key(50000).flow_hash());
        assert_ne!(key(50000).flow_hash(), key(50001).flow_hash());
    }

    #[test]
    fn test_bucket_in_range() {
        for port in 40000..40100 {
            assert!(key(port).bucket(1009) < 1009);
        }
        assert_eq!(key(1).bucket(0), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            key(50000).to_string(),
            "(192.168.1.10:50000) - (142.250.74.14:443)"
        );
        assert_eq!(Direction::ServerToClient.to_string(), "s->c");
    }
}
