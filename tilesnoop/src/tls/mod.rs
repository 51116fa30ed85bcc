//! Record framing for encrypted tile traffic.
//!
//! The analysis never decrypts anything. It only needs the length of every
//! application-data record a direction carries, which the record framing
//! exposes in the clear.
//!
//! - [`parse_record`] classifies the record at the front of a buffer
//! - [`RecordStream`] consumes records from a per-direction byte stream that
//!   arrives in arbitrary partial deliveries

mod record;
mod stream;

pub use record::{
    parse_record, ContentType, RecordError, RecordHeader, LEGACY_HEADER_LEN, LEGACY_VERSION_TAG,
    RECORD_MAJOR_VERSION, STANDARD_HEADER_LEN,
};
pub use stream::{FeedOutcome, RecordStream};
