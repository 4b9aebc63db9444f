//! Error types for framing and connection handling.
//!
//! Every variant is scoped to a single connection: the event loop closes
//! the offending peer and keeps servicing everyone else.

use std::io;
use thiserror::Error;

/// A wire-format inconsistency detected while decoding or encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    /// The length prefix decoded to a negative value.
    #[error("negative length ({0})")]
    NegativeLength(i32),

    /// The declared length exceeds the configured maximum.
    #[error("frame too large ({len} > {max})")]
    FrameTooLarge { len: usize, max: usize },
}

/// Main error type for frame I/O.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer reached end-of-stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// Declared length was negative, too large, or otherwise malformed.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    /// Unrecoverable socket error (reset, write of zero bytes, ...).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True if the error was caused by the peer rather than the local side.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, FrameError::ProtocolViolation(_))
    }
}

/// Result type alias using FrameError.
pub type Result<T> = std::result::Result<T, FrameError>;
