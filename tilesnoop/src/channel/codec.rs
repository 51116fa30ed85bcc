//! Exchange frame codec.
//!
//! Wire format, network byte order:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 1    | tag `'E'`      |
//! | 1      | 8    | timestamp (s)  |
//! | 9      | 4    | response size  |
//! | 13     | 4    | request size   |

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::flow::Exchange;

/// Tag byte of an exchange frame.
pub const EXCHANGE_TAG: u8 = b'E';

/// Encoded size of one exchange frame.
pub const FRAME_LEN: usize = 1 + 8 + 4 + 4;

/// Errors from the capture-to-analysis channel.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame tag is not one the analysis side understands.
    #[error("Unknown frame tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// The analysis side dropped its receiver.
    #[error("Frame channel closed")]
    Closed,

    #[error("I/O error on frame channel: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes and decodes [`Exchange`] frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeCodec;

impl Encoder<Exchange> for ExchangeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Exchange, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(FRAME_LEN);
        dst.put_u8(EXCHANGE_TAG);
        dst.put_u64(item.timestamp);
        dst.put_u32(item.response_size);
        dst.put_u32(item.request_size);
        Ok(())
    }
}

impl Decoder for ExchangeCodec {
    type Item = Exchange;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&tag) = src.first() else {
            return Ok(None);
        };
        if tag != EXCHANGE_TAG {
            return Err(FrameError::UnknownTag(tag));
        }
        if src.len() < FRAME_LEN {
            src.reserve(FRAME_LEN - src.len());
            return Ok(None);
        }

        src.advance(1);
        let timestamp = src.get_u64();
        let response_size = src.get_u32();
        let request_size = src.get_u32();
        Ok(Some(Exchange::new(timestamp, request_size, response_size)))
    }
}
