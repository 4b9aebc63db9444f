//! lenframe: length-prefixed message framing over a single-threaded reactor.
//!
//! Wire format: a 4-byte signed length (big-endian by default) followed by
//! exactly that many payload bytes.
//!
//! - `runtime`: mio event loop, frame decoder/encoder, connection registry
//! - `protocols`: applications served over frames (echo, relay, greet)
//! - `client`: async (tokio) client for the same wire format
//! - `config`: CLI and TOML configuration for the host binary

pub mod client;
pub mod config;
pub mod error;
pub mod protocols;
pub mod runtime;
pub mod wire;

pub use error::{FrameError, Result, Violation};
pub use wire::{ByteOrder, FrameLimits};
