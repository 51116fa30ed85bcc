//! Packet sources.
//!
//! Offline captures are read with `pcap-parser`. Live capture goes through
//! libpcap and is only built with the `live-capture` feature.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError};
use tracing::{debug, warn};

use super::CaptureError;

/// Read buffer for offline captures.
const READ_BUFFER: usize = 65536;

/// Link-layer framing of captured packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Linux cooked capture (SLL).
    LinuxSll,
    /// Packets begin with the IP header.
    RawIp,
    Other(i32),
}

impl LinkType {
    /// Map a libpcap DLT / LINKTYPE value.
    pub fn from_dlt(value: i32) -> Self {
        match value {
            1 => LinkType::Ethernet,
            113 => LinkType::LinuxSll,
            // LINKTYPE_RAW, DLT_RAW on most platforms, LINKTYPE_IPV4
            101 | 12 | 14 | 228 => LinkType::RawIp,
            other => LinkType::Other(other),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, LinkType::Other(_))
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Capture time in seconds.
    pub timestamp: u64,
    pub data: Vec<u8>,
}

/// Result of polling a source.
#[derive(Debug)]
pub enum Fetched {
    Packet(RawPacket),
    /// No packet arrived within the read timeout.
    Timeout,
    /// The source is exhausted.
    Eof,
}

/// A blocking supplier of captured frames.
pub trait PacketSource: Send {
    /// Block until the next packet, a read timeout, or end of input.
    fn next_packet(&mut self) -> Result<Fetched, CaptureError>;

    /// Framing of the packets returned.
    fn link_type(&self) -> LinkType;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Offline
// ─────────────────────────────────────────────────────────────────────────────

/// Legacy pcap file reader.
pub struct OfflineSource {
    path: PathBuf,
    reader: LegacyPcapReader<BufReader<File>>,
    link: LinkType,
    packets: u64,
}

impl std::fmt::Debug for OfflineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineSource")
            .field("path", &self.path)
            .field("link", &self.link)
            .field("packets", &self.packets)
            .finish()
    }
}

impl OfflineSource {
    /// Open a capture file. The file header must be a valid legacy pcap
    /// header with a supported link type.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = File::open(path).map_err(|source| CaptureError::Open {
            target: path.display().to_string(),
            source,
        })?;
        let reader = LegacyPcapReader::new(READ_BUFFER, BufReader::new(file)).map_err(|e| {
            CaptureError::BadCaptureFile {
                path: path.to_path_buf(),
                reason: format!("{e:?}"),
            }
        })?;

        let mut source = Self {
            path: path.to_path_buf(),
            reader,
            link: LinkType::Ethernet,
            packets: 0,
        };
        source.read_header()?;
        Ok(source)
    }

    fn read_header(&mut self) -> Result<(), CaptureError> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let linktype = match block {
                        PcapBlockOwned::LegacyHeader(ref header) => Some(header.network),
                        _ => None,
                    };
                    self.reader.consume(offset);
                    let Some(Linktype(value)) = linktype else {
                        return Err(Self::bad(&self.path, "missing file header"));
                    };
                    self.link = LinkType::from_dlt(value);
                    if !self.link.is_supported() {
                        return Err(CaptureError::UnsupportedLinkType(value));
                    }
                    debug!(path = %self.path.display(), link = ?self.link, "Capture file opened");
                    return Ok(());
                }
                Err(PcapError::Incomplete(_)) => self.refill()?,
                Err(e) => return Err(Self::bad(&self.path, format!("{e:?}"))),
            }
        }
    }

    fn refill(&mut self) -> Result<(), CaptureError> {
        self.reader.refill().map_err(|e| CaptureError::BadCaptureFile {
            path: self.path.clone(),
            reason: format!("{e:?}"),
        })
    }

    fn bad(path: &Path, reason: impl Into<String>) -> CaptureError {
        CaptureError::BadCaptureFile {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl PacketSource for OfflineSource {
    fn next_packet(&mut self) -> Result<Fetched, CaptureError> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let packet = match block {
                        PcapBlockOwned::Legacy(ref frame) => Some(RawPacket {
                            timestamp: frame.ts_sec as u64,
                            data: frame.data.to_vec(),
                        }),
                        PcapBlockOwned::LegacyHeader(_) => None,
                        PcapBlockOwned::NG(_) => {
                            warn!("Skipping pcapng block in legacy capture");
                            None
                        }
                    };
                    self.reader.consume(offset);
                    if let Some(packet) = packet {
                        self.packets += 1;
                        return Ok(Fetched::Packet(packet));
                    }
                }
                Err(PcapError::Eof) => {
                    debug!(packets = self.packets, "End of capture file");
                    return Ok(Fetched::Eof);
                }
                Err(PcapError::Incomplete(_)) => self.refill()?,
                Err(e) => return Err(Self::bad(&self.path, format!("{e:?}"))),
            }
        }
    }

    fn link_type(&self) -> LinkType {
        self.link
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Live
// ─────────────────────────────────────────────────────────────────────────────

/// Read timeout of a live capture, so cancellation is noticed.
#[cfg(feature = "live-capture")]
const LIVE_READ_TIMEOUT_MS: i32 = 500;

/// libpcap capture on a network interface.
#[cfg(feature = "live-capture")]
pub struct LiveSource {
    device: String,
    capture: pcap::Capture<pcap::Active>,
    link: LinkType,
}

#[cfg(feature = "live-capture")]
impl LiveSource {
    /// Open `device` and install `filter` as the kernel filter.
    pub fn open(device: &str, filter: &str) -> Result<Self, CaptureError> {
        let open_err = |e: pcap::Error| CaptureError::Open {
            target: device.to_string(),
            source: std::io::Error::other(e.to_string()),
        };

        let mut capture = pcap::Capture::from_device(device)
            .map_err(open_err)?
            .promisc(true)
            .snaplen(65535)
            .timeout(LIVE_READ_TIMEOUT_MS)
            .immediate_mode(true)
            .open()
            .map_err(open_err)?;
        capture
            .filter(filter, true)
            .map_err(|e| CaptureError::Filter(e.to_string()))?;

        let pcap::Linktype(value) = capture.get_datalink();
        let link = LinkType::from_dlt(value);
        if !link.is_supported() {
            return Err(CaptureError::UnsupportedLinkType(value));
        }
        debug!(device, filter, link = ?link, "Live capture opened");

        Ok(Self {
            device: device.to_string(),
            capture,
            link,
        })
    }
}

#[cfg(feature = "live-capture")]
impl PacketSource for LiveSource {
    fn next_packet(&mut self) -> Result<Fetched, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Fetched::Packet(RawPacket {
                timestamp: packet.header.ts.tv_sec.max(0) as u64,
                data: packet.data.to_vec(),
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(Fetched::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(Fetched::Eof),
            Err(e) => Err(CaptureError::Device(e.to_string())),
        }
    }

    fn link_type(&self) -> LinkType {
        self.link
    }

    fn describe(&self) -> String {
        format!("device {}", self.device)
    }
}

/// Placeholder used when live capture support is not compiled in.
#[cfg(not(feature = "live-capture"))]
#[derive(Debug)]
pub struct LiveSource;

#[cfg(not(feature = "live-capture"))]
impl LiveSource {
    pub fn open(_device: &str, _filter: &str) -> Result<Self, CaptureError> {
        Err(CaptureError::LiveUnsupported)
    }
}

#[cfg(not(feature = "live-capture"))]
impl PacketSource for LiveSource {
    fn next_packet(&mut self) -> Result<Fetched, CaptureError> {
        Err(CaptureError::LiveUnsupported)
    }

    fn link_type(&self) -> LinkType {
        LinkType::Ethernet
    }

    fn describe(&self) -> String {
        "live capture (unavailable)".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Replays packets held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    packets: std::collections::VecDeque<RawPacket>,
    link: LinkType,
}

impl MemorySource {
    pub fn new(link: LinkType, packets: impl IntoIterator<Item = RawPacket>) -> Self {
        Self {
            packets: packets.into_iter().collect(),
            link,
        }
    }
}

impl PacketSource for MemorySource {
    fn next_packet(&mut self) -> Result<Fetched, CaptureError> {
        Ok(self
            .packets
            .pop_front()
            .map_or(Fetched::Eof, Fetched::Packet))
    }

    fn link_type(&self) -> LinkType {
        self.link
    }

    fn describe(&self) -> String {
        format!("{} buffered packets", self.packets.len())
    }
}
