//! Record header classification.
//!
//! Only the framing is inspected; payload bytes are never read.

use thiserror::Error;

/// Length of the standard record header (type, major, minor, length).
pub const STANDARD_HEADER_LEN: usize = 5;

/// Length of the legacy two-byte length prefix.
pub const LEGACY_HEADER_LEN: usize = 2;

/// Bytes 2-3 of a legacy handshake record (message type, major version).
pub const LEGACY_VERSION_TAG: [u8; 2] = [0x01, 0x03];

/// Major protocol version carried by every standard record.
pub const RECORD_MAJOR_VERSION: u8 = 3;

/// Record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
}

impl ContentType {
    /// Parse a wire content type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            20 => Some(Self::ChangeCipherSpec),
            21 => Some(Self::Alert),
            22 => Some(Self::Handshake),
            23 => Some(Self::ApplicationData),
            _ => None,
        }
    }

    /// The wire byte for this content type.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::ChangeCipherSpec => 20,
            Self::Alert => 21,
            Self::Handshake => 22,
            Self::ApplicationData => 23,
        }
    }
}

/// Header of one complete record found at the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    /// Declared payload length in bytes.
    pub payload_len: usize,
    /// Header length, 2 for legacy records and 5 otherwise.
    pub header_len: usize,
}

impl RecordHeader {
    /// Bytes the record occupies in the stream, header included.
    pub fn total_len(&self) -> usize {
        self.header_len + self.payload_len
    }

    /// Whether the record carries application data.
    pub fn is_application_data(&self) -> bool {
        self.content_type == ContentType::ApplicationData
    }
}

/// Errors from record classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Not enough bytes yet; the buffer must be kept and retried.
    #[error("Incomplete record: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("Unknown record content type: {0}")]
    UnknownContentType(u8),

    #[error("Unsupported record major version: {0}")]
    UnsupportedVersion(u8),

    #[error("Legacy record carries tag {0:02x?}, expected [01, 03]")]
    BadLegacyTag([u8; 2]),
}

impl RecordError {
    /// Incomplete data is recoverable; every other error means the stream
    /// is desynchronised.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, RecordError::Incomplete { .. })
    }
}

/// Classify the record at the front of `buf`.
///
/// Succeeds only when the whole record, payload included, is present.
/// Header bytes are validated as soon as they are available so garbage is
/// rejected without waiting for more data.
pub fn parse_record(buf: &[u8]) -> Result<RecordHeader, RecordError> {
    let Some(&first) = buf.first() else {
        return Err(RecordError::Incomplete {
            needed: STANDARD_HEADER_LEN,
            available: 0,
        });
    };

    if first & 0x80 != 0 {
        parse_legacy(buf)
    } else {
        parse_standard(buf)
    }
}

fn parse_legacy(buf: &[u8]) -> Result<RecordHeader, RecordError> {
    // The tag lives in the first two payload bytes
    let tag_end = LEGACY_HEADER_LEN + LEGACY_VERSION_TAG.len();
    if buf.len() < tag_end {
        return Err(RecordError::Incomplete {
            needed: tag_end,
            available: buf.len(),
        });
    }

    let tag = [buf[2], buf[3]];
    if tag != LEGACY_VERSION_TAG {
        return Err(RecordError::BadLegacyTag(tag));
    }

    let payload_len = (((buf[0] & 0x7f) as usize) << 8) | buf[1] as usize;
    let header = RecordHeader {
        content_type: ContentType::Handshake,
        payload_len,
        header_len: LEGACY_HEADER_LEN,
    };
    require_complete(buf, header)
}

fn parse_standard(buf: &[u8]) -> Result<RecordHeader, RecordError> {
    let content_type =
        ContentType::from_byte(buf[0]).ok_or(RecordError::UnknownContentType(buf[0]))?;

    if let Some(&major) = buf.get(1) {
        if major != RECORD_MAJOR_VERSION {
            return Err(RecordError::UnsupportedVersion(major));
        }
    }

    if buf.len() < STANDARD_HEADER_LEN {
        return Err(RecordError::Incomplete {
            needed: STANDARD_HEADER_LEN,
            available: buf.len(),
        });
    }

    let payload_len = ((buf[3] as usize) << 8) | buf[4] as usize;
    let header = RecordHeader {
        content_type,
        payload_len,
        header_len: STANDARD_HEADER_LEN,
    };
    require_complete(buf, header)
}

fn require_complete(buf: &[u8], header: RecordHeader) -> Result<RecordHeader, RecordError> {
    if buf.len() < header.total_len() {
        return Err(RecordError::Incomplete {
            needed: header.total_len(),
            available: buf.len(),
        });
    }
    Ok(header)
}
