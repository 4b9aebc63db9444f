//! Token layout and readiness classification for the event loop.
//!
//! Connection tokens are slab indices; the top of the token space is
//! reserved for the listener and the offload waker. Every mio event is
//! turned into at most two `Readiness` kinds, which the loop dispatches
//! through a single table.

use mio::event::Event;
use mio::Token;

use crate::runtime::connection::ConnectionId;

/// Listening socket.
pub const LISTENER: Token = Token(usize::MAX);
/// Offload pool completions.
pub const WAKER: Token = Token(usize::MAX - 1);

/// What an event's token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Listener,
    Waker,
    Connection(ConnectionId),
}

impl Target {
    pub fn from_token(token: Token) -> Self {
        match token {
            LISTENER => Target::Listener,
            WAKER => Target::Waker,
            Token(id) => Target::Connection(ConnectionId(id)),
        }
    }
}

pub fn connection_token(id: ConnectionId) -> Token {
    Token(id.0)
}

/// Kind of work a readiness event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Listener has pending connections.
    Accept,
    /// Connection has bytes (or EOF, or an error) to read.
    Read,
    /// Connection can take more outbound bytes.
    Write,
    /// Outbound connect has resolved, successfully or not.
    Connect,
    /// Offload pool has completions.
    Wake,
}

/// The parts of a mio event the dispatcher cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFlags {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

impl From<&Event> for EventFlags {
    fn from(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Map an event to the handlers that should run, in order.
///
/// `connecting` is true while the target connection's outbound connect is
/// still pending; only the connect handler runs in that case.
pub fn classify(target: Target, flags: EventFlags, connecting: bool) -> [Option<Readiness>; 2] {
    match target {
        Target::Listener => [Some(Readiness::Accept), None],
        Target::Waker => [Some(Readiness::Wake), None],
        Target::Connection(_) if connecting => {
            let resolved = flags.writable || flags.error || flags.write_closed;
            [resolved.then_some(Readiness::Connect), None]
        }
        Target::Connection(_) => {
            let read = flags.readable || flags.read_closed || flags.error;
            let write = flags.writable || flags.write_closed;
            [
                read.then_some(Readiness::Read),
                write.then_some(Readiness::Write),
            ]
        }
    }
}
