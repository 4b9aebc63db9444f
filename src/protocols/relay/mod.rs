//! Chat relay protocol.
//!
//! Each frame is rebroadcast to every open connection, the sender
//! included, tagged with the sender's id:
//!
//! ```text
//! conn-2 sends:        "hi all"
//! everyone receives:   "[conn-2] hi all"
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::runtime::{Application, ConnectionId, Context};

#[derive(Debug, Default)]
pub struct Relay;

impl Relay {
    pub fn new() -> Self {
        Self
    }
}

/// Prefix `payload` with the sender tag.
pub fn tag(sender: ConnectionId, payload: &[u8]) -> Bytes {
    let tag = format!("[{sender}] ");
    let mut out = BytesMut::with_capacity(tag.len() + payload.len());
    out.put_slice(tag.as_bytes());
    out.put_slice(payload);
    out.freeze()
}

impl Application for Relay {
    fn on_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        debug!(conn_id = %conn, members = ctx.connections().len(), "Joined relay");
    }

    fn on_frame(
        &mut self,
        ctx: &mut Context<'_>,
        conn: ConnectionId,
        payload: Bytes,
    ) -> Option<Bytes> {
        debug!(conn_id = %conn, len = payload.len(), "Relaying message");
        ctx.broadcast(tag(conn, &payload));
        None
    }

    fn on_close(&mut self, _ctx: &mut Context<'_>, conn: ConnectionId) {
        debug!(conn_id = %conn, "Left relay");
    }
}
