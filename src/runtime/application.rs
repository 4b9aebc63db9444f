//! Application boundary for the event loop.
//!
//! Callbacks run synchronously on the loop thread. They never touch
//! connection state directly: side effects are recorded on a `Context` and
//! applied by the loop once the callback returns.

use bytes::Bytes;

use crate::runtime::connection::ConnectionId;

/// Blocking work to run on the offload pool. The returned payload, if any,
/// is enqueued to the originating connection.
pub type Job = Box<dyn FnOnce() -> Option<Bytes> + Send + 'static>;

/// A side effect requested by an application callback.
pub enum Action {
    Enqueue(ConnectionId, Bytes),
    Broadcast(Bytes),
    Close(ConnectionId),
    Offload(ConnectionId, Job),
}

/// Handle passed to application callbacks.
pub struct Context<'a> {
    open: &'a [ConnectionId],
    actions: Vec<Action>,
}

impl<'a> Context<'a> {
    pub fn new(open: &'a [ConnectionId]) -> Self {
        Self {
            open,
            actions: Vec::new(),
        }
    }

    /// Connections open when the callback started.
    pub fn connections(&self) -> &[ConnectionId] {
        self.open
    }

    /// Schedule `payload` for transmission to `conn`.
    pub fn enqueue(&mut self, conn: ConnectionId, payload: impl Into<Bytes>) {
        self.actions.push(Action::Enqueue(conn, payload.into()));
    }

    /// Schedule `payload` for every open connection.
    pub fn broadcast(&mut self, payload: impl Into<Bytes>) {
        self.actions.push(Action::Broadcast(payload.into()));
    }

    /// Close `conn` after pending actions are applied. Unsent frames are dropped.
    pub fn close(&mut self, conn: ConnectionId) {
        self.actions.push(Action::Close(conn));
    }

    /// Run `job` on the offload pool and send its result to `conn`.
    pub fn offload<F>(&mut self, conn: ConnectionId, job: F)
    where
        F: FnOnce() -> Option<Bytes> + Send + 'static,
    {
        self.actions.push(Action::Offload(conn, Box::new(job)));
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}

/// Consumer of completed frames.
pub trait Application {
    /// Called once per completed frame, in arrival order.
    ///
    /// A returned payload is enqueued to `conn` after any actions recorded
    /// on `ctx`. Must not block.
    fn on_frame(&mut self, ctx: &mut Context<'_>, conn: ConnectionId, payload: Bytes)
        -> Option<Bytes>;

    /// Called when a connection is accepted or an outbound connect completes.
    fn on_open(&mut self, _ctx: &mut Context<'_>, _conn: ConnectionId) {}

    /// Called after a connection has been removed from the registry.
    fn on_close(&mut self, _ctx: &mut Context<'_>, _conn: ConnectionId) {}
}

impl<A: Application + ?Sized> Application for Box<A> {
    fn on_frame(
        &mut self,
        ctx: &mut Context<'_>,
        conn: ConnectionId,
        payload: Bytes,
    ) -> Option<Bytes> {
        (**self).on_frame(ctx, conn, payload)
    }

    fn on_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        (**self).on_open(ctx, conn)
    }

    fn on_close(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
        (**self).on_close(ctx, conn)
    }
}
