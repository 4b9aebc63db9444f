//! Echo protocol.
//!
//! Every frame is sent back to its sender unchanged:
//!
//! ```text
//! Request:  00 00 00 05 'h' 'e' 'l' 'l' 'o'
//! Response: 00 00 00 05 'h' 'e' 'l' 'l' 'o'
//! ```
//!
//! The offloaded variant produces the reply on the offload pool instead of
//! the loop thread, exercising the asynchronous completion path end to end.

use bytes::Bytes;
use tracing::trace;

use crate::runtime::{Application, ConnectionId, Context};

#[derive(Debug, Default)]
pub struct Echo {
    offload: bool,
}

impl Echo {
    pub fn new() -> Self {
        Self { offload: false }
    }

    /// Echo with replies built on the offload pool.
    pub fn offloaded() -> Self {
        Self { offload: true }
    }
}

impl Application for Echo {
    fn on_frame(
        &mut self,
        ctx: &mut Context<'_>,
        conn: ConnectionId,
        payload: Bytes,
    ) -> Option<Bytes> {
        trace!(conn_id = %conn, len = payload.len(), offload = self.offload, "Echo");
        if self.offload {
            ctx.offload(conn, move || Some(payload));
            None
        } else {
            Some(payload)
        }
    }
}
