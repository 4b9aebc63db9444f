//! Outbound frame queue with partial-write resumption.
//!
//! Each enqueued payload is encoded once into `prefix ‖ payload`. The
//! cursor tracks how much of the head frame the socket has accepted, so a
//! resumed flush continues mid-frame and never resends the prefix.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io::{self, Write};

use crate::error::Result;
use crate::wire::FrameLimits;

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every queued byte has been written.
    Drained,
    /// The socket would block; wait for write readiness and flush again.
    Pending,
}

/// Pending outbound frames for one connection, in enqueue order.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    queue: VecDeque<Bytes>,
    /// Bytes of `queue[0]` already written.
    cursor: usize,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `payload` and append it behind any frames already queued.
    ///
    /// Oversized payloads are rejected and nothing is queued.
    pub fn enqueue(&mut self, payload: &[u8], limits: &FrameLimits) -> Result<()> {
        let frame = limits.encode(payload)?;
        self.enqueue_encoded(frame);
        Ok(())
    }

    /// Append a frame that already carries its prefix.
    pub fn enqueue_encoded(&mut self, frame: Bytes) {
        self.queue.push_back(frame);
    }

    /// Write as much as the socket accepts.
    pub fn flush<W: Write>(&mut self, dst: &mut W) -> Result<FlushOutcome> {
        while let Some(head) = self.queue.front() {
            match dst.write(&head[self.cursor..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0").into());
                }
                Ok(n) => {
                    self.cursor += n;
                    if self.cursor == head.len() {
                        self.queue.pop_front();
                        self.cursor = 0;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::Pending);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(FlushOutcome::Drained)
    }

    /// True when nothing is waiting to be written.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of frames not yet fully written.
    pub fn pending_frames(&self) -> usize {
        self.queue.len()
    }

    /// Bytes still owed to the socket across all queued frames.
    pub fn pending_bytes(&self) -> usize {
        self.queue.iter().map(Bytes::len).sum::<usize>() - self.cursor
    }
}
