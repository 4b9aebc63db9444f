//! Per-connection frame decoder.
//!
//! Reassembles length-prefixed frames from a non-blocking byte stream.
//! Each call performs a single read bounded by the remaining capacity of the
//! current buffer, so bytes belonging to the next frame stay in the socket
//! until the decoder is ready for them.
//!
//! ## State machine
//!
//! ```text
//!   AwaitingLength --(4 bytes, L > 0)--> AwaitingBody --(L bytes)--> AwaitingLength
//!         ^    |
//!         +----+ (L == 0: empty frame emitted immediately)
//! ```

use bytes::Bytes;
use std::io::{self, Read};

use crate::error::{FrameError, Result};
use crate::wire::{FrameLimits, LENGTH_PREFIX_LEN};

/// Which buffer the decoder is currently filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingLength,
    AwaitingBody,
}

/// Result of a single decode step.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A frame completed on this read.
    Frame(Bytes),
    /// Bytes arrived but the current buffer is not yet full.
    NeedData,
    /// The socket has nothing more to give until the next readiness event.
    WouldBlock,
}

/// In-progress frame assembly for one connection.
#[derive(Debug)]
pub struct DecodeState {
    phase: Phase,
    length_buf: [u8; LENGTH_PREFIX_LEN],
    /// Sized to exactly `declared_len` while `AwaitingBody`, empty otherwise.
    body: Vec<u8>,
    declared_len: usize,
    /// Write offset into the current buffer.
    filled: usize,
}

impl Default for DecodeState {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeState {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingLength,
            length_buf: [0; LENGTH_PREFIX_LEN],
            body: Vec::new(),
            declared_len: 0,
            filled: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Payload length announced by the current prefix (0 while awaiting it).
    pub fn declared_len(&self) -> usize {
        self.declared_len
    }

    /// Allocated capacity of the body buffer.
    pub fn body_capacity(&self) -> usize {
        self.body.capacity()
    }

    /// Bytes of the current buffer still to be filled.
    pub fn remaining(&self) -> usize {
        match self.phase {
            Phase::AwaitingLength => LENGTH_PREFIX_LEN - self.filled,
            Phase::AwaitingBody => self.declared_len - self.filled,
        }
    }

    /// Perform one non-blocking read and advance the state machine.
    ///
    /// Returns `ConnectionClosed` on end-of-stream; any partial frame is
    /// dropped with the state.
    pub fn read_from<R: Read>(&mut self, src: &mut R, limits: &FrameLimits) -> Result<ReadOutcome> {
        let unfilled = match self.phase {
            Phase::AwaitingLength => &mut self.length_buf[self.filled..],
            Phase::AwaitingBody => &mut self.body[self.filled..],
        };

        let n = match src.read(unfilled) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(ReadOutcome::WouldBlock)
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(ReadOutcome::NeedData)
            }
            Err(e) => return Err(e.into()),
        };

        self.filled += n;
        if self.remaining() > 0 {
            return Ok(ReadOutcome::NeedData);
        }

        match self.phase {
            Phase::AwaitingLength => self.complete_length(limits),
            Phase::AwaitingBody => Ok(ReadOutcome::Frame(self.take_body())),
        }
    }

    fn complete_length(&mut self, limits: &FrameLimits) -> Result<ReadOutcome> {
        let declared = limits.byte_order.read_len(self.length_buf);
        let len = match limits.check_declared(declared) {
            Ok(len) => len,
            Err(v) => {
                self.reset();
                return Err(v.into());
            }
        };

        if len == 0 {
            // A zero-capacity body would never become readable.
            self.reset();
            return Ok(ReadOutcome::Frame(Bytes::new()));
        }

        self.body = vec![0u8; len];
        self.declared_len = len;
        self.filled = 0;
        self.phase = Phase::AwaitingBody;
        Ok(ReadOutcome::NeedData)
    }

    fn take_body(&mut self) -> Bytes {
        let body = std::mem::take(&mut self.body);
        self.reset();
        Bytes::from(body)
    }

    /// Return to `AwaitingLength`, discarding any partial frame.
    pub fn reset(&mut self) {
        self.phase = Phase::AwaitingLength;
        self.length_buf = [0; LENGTH_PREFIX_LEN];
        self.body = Vec::new();
        self.declared_len = 0;
        self.filled = 0;
    }
}
