//! Wire format shared by the reactor and the async client.
//!
//! ```text
//! +----------------+---------------------------+
//! | length (i32)   | payload (exactly L bytes) |
//! +----------------+---------------------------+
//! ```
//!
//! The prefix is a signed 32-bit integer so a peer sending a negative
//! length is detectable. Big-endian unless configured otherwise.
//! No magic number, version byte, or checksum.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;

use crate::error::Violation;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Byte order of the length prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    /// Decode a length prefix.
    pub fn read_len(self, prefix: [u8; LENGTH_PREFIX_LEN]) -> i32 {
        match self {
            ByteOrder::Big => i32::from_be_bytes(prefix),
            ByteOrder::Little => i32::from_le_bytes(prefix),
        }
    }

    fn put_len(self, len: i32, out: &mut BytesMut) {
        match self {
            ByteOrder::Big => out.put_i32(len),
            ByteOrder::Little => out.put_i32_le(len),
        }
    }
}

/// Limits applied to every frame crossing the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_frame_size: usize,
    pub byte_order: ByteOrder,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            byte_order: ByteOrder::Big,
        }
    }
}

impl FrameLimits {
    /// Validate a decoded prefix, returning the payload length.
    pub fn check_declared(&self, declared: i32) -> Result<usize, Violation> {
        if declared < 0 {
            return Err(Violation::NegativeLength(declared));
        }
        let len = declared as usize;
        if len > self.max_frame_size {
            return Err(Violation::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }
        Ok(len)
    }

    /// Build `prefix ‖ payload` as a single contiguous buffer.
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, Violation> {
        let too_large = Violation::FrameTooLarge {
            len: payload.len(),
            max: self.max_frame_size,
        };
        if payload.len() > self.max_frame_size {
            return Err(too_large);
        }
        let len = i32::try_from(payload.len()).map_err(|_| too_large)?;

        let mut out = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
        self.byte_order.put_len(len, &mut out);
        out.extend_from_slice(payload);
        Ok(out.freeze())
    }
}
