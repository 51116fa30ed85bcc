//! Tile server allow-list.
//!
//! Only connections to known tile servers are followed. The server set
//! comes either from a file with one IPv4 address per line or from DNS
//! resolution of the public tile hostnames.

use std::collections::BTreeSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

/// Hostnames serving satellite tiles.
pub const TILE_HOSTS: [&str; 4] = [
    "khms0.google.com",
    "khms1.google.com",
    "khms2.google.com",
    "khms3.google.com",
];

/// Errors from building the allow-list.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Cannot read address list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line} of the address list is not an IPv4 address: '{text}'")]
    InvalidAddress { line: usize, text: String },

    #[error("Cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No server addresses to filter on")]
    Empty,
}

/// Set of tile server addresses and the port they serve on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAllowList {
    servers: BTreeSet<Ipv4Addr>,
    port: u16,
}

impl ServerAllowList {
    /// Build from explicit addresses. An empty set is an error.
    pub fn new(servers: impl IntoIterator<Item = Ipv4Addr>, port: u16) -> Result<Self, HostError> {
        let servers: BTreeSet<_> = servers.into_iter().collect();
        if servers.is_empty() {
            return Err(HostError::Empty);
        }
        Ok(Self { servers, port })
    }

    /// Parse an address list: one IPv4 address per line, blank lines
    /// skipped.
    pub fn parse(text: &str, port: u16) -> Result<Self, HostError> {
        let mut servers = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let addr = trimmed
                .parse::<Ipv4Addr>()
                .map_err(|_| HostError::InvalidAddress {
                    line: index + 1,
                    text: trimmed.to_string(),
                })?;
            servers.push(addr);
        }
        Self::new(servers, port)
    }

    /// Read and parse an address list file.
    pub fn from_file(path: &Path, port: u16) -> Result<Self, HostError> {
        let text = fs::read_to_string(path).map_err(|source| HostError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Parsing the supplied list of IPv4 addresses");
        Self::parse(&text, port)
    }

    /// Resolve `hosts` to their IPv4 addresses.
    ///
    /// Any failed lookup is fatal.
    pub async fn resolve(hosts: &[&str], port: u16) -> Result<Self, HostError> {
        let mut servers = Vec::new();
        for host in hosts {
            debug!(host, "Trying to resolve");
            let addrs = tokio::net::lookup_host((*host, port))
                .await
                .map_err(|source| HostError::Resolve {
                    host: host.to_string(),
                    source,
                })?;
            for addr in addrs {
                if let IpAddr::V4(v4) = addr.ip() {
                    trace!(host, addr = %v4, "Host resolves");
                    servers.push(v4);
                }
            }
        }
        Self::new(servers, port)
    }

    /// Resolve the default tile hostnames.
    pub async fn resolve_tile_hosts(port: u16) -> Result<Self, HostError> {
        Self::resolve(&TILE_HOSTS, port).await
    }

    /// Whether `addr:port` is a followed server endpoint.
    pub fn matches(&self, addr: Ipv4Addr, port: u16) -> bool {
        port == self.port && self.servers.contains(&addr)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn servers(&self) -> impl Iterator<Item = &Ipv4Addr> + '_ {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Capture filter selecting traffic to and from the servers.
    pub fn bpf_expression(&self) -> String {
        let hosts: Vec<String> = self.servers.iter().map(|a| format!("host {a}")).collect();
        format!("({}) and port {}", hosts.join(" or "), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let list = ServerAllowList::parse("10.0.0.1\n\n  10.0.0.2 \n10.0.0.1\n", 443).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.matches(Ipv4Addr::new(10, 0, 0, 2), 443));
        assert!(!list.matches(Ipv4Addr::new(10, 0, 0, 2), 80));
        assert!(!list.matches(Ipv4Addr::new(10, 0, 0, 3), 443));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = ServerAllowList::parse("10.0.0.1\nkhms0.google.com\n", 443).unwrap_err();
        assert!(matches!(err, HostError::InvalidAddress { line: 2, .. }));
    }

    #[test]
    fn test_empty_list_is_fatal() {
        assert!(matches!(
            ServerAllowList::parse("\n\n", 443),
            Err(HostError::Empty)
        ));
    }

    #[test]
    fn test_bpf_expression() {
        let list = ServerAllowList::new(
            [Ipv4Addr::new(172, 217, 0, 2), Ipv4Addr::new(142, 250, 0, 1)],
            443,
        )
        .unwrap();
        assert_eq!(
            list.bpf_expression(),
            "(host 142.250.0.1 or host 172.217.0.2) and port 443"
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.txt");
        fs::write(&path, "192.0.2.7\n").unwrap();
        let list = ServerAllowList::from_file(&path, 443).unwrap();
        assert_eq!(list.servers().next(), Some(&Ipv4Addr::new(192, 0, 2, 7)));
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let list = ServerAllowList::resolve(&["127.0.0.1"], 443).await.unwrap();
        assert!(list.matches(Ipv4Addr::LOCALHOST, 443));
    }
}
