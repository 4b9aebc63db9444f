//! Connection records and the slab-backed registry that owns them.
//!
//! Each connection exclusively owns its decode and encode state; nothing
//! here is shared across connections or threads.

use slab::Slab;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::runtime::decoder::DecodeState;
use crate::runtime::encoder::FrameEncoder;

/// Identity of a connection within one event loop.
///
/// Slab indices are reused after close; pair with `Connection::serial`
/// when a stale reference must be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single peer connection.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    pub peer: SocketAddr,
    /// Unique for the lifetime of the loop, unlike the slab index.
    pub serial: u64,
    pub decoder: DecodeState,
    pub encoder: FrameEncoder,
    /// Outbound connect still in progress.
    pub connecting: bool,
    /// WRITABLE interest currently registered with the poller.
    pub write_interest: bool,
    pub last_active: Instant,
}

impl<S> Connection<S> {
    /// Create a connection in `AwaitingLength` with an empty write queue.
    pub fn new(stream: S, peer: SocketAddr, serial: u64) -> Self {
        Self {
            stream,
            peer,
            serial,
            decoder: DecodeState::new(),
            encoder: FrameEncoder::new(),
            connecting: false,
            write_interest: false,
            last_active: Instant::now(),
        }
    }

    /// Create an outbound connection awaiting connect completion.
    pub fn connecting(stream: S, peer: SocketAddr, serial: u64) -> Self {
        Self {
            connecting: true,
            ..Self::new(stream, peer, serial)
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
    next_serial: u64,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
            next_serial: 0,
        }
    }

    /// Hand out the serial for the next connection.
    pub fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// True if another connection would exceed the limit.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<ConnectionId> {
        if self.is_full() {
            return None;
        }
        Some(ConnectionId(self.connections.insert(conn)))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection<S>> {
        self.connections.get(id.0)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id.0)
    }

    /// Look up a connection only if it is still the same incarnation.
    pub fn get_live_mut(&mut self, id: ConnectionId, serial: u64) -> Option<&mut Connection<S>> {
        self.connections
            .get_mut(id.0)
            .filter(|conn| conn.serial == serial)
    }

    /// Remove a connection from the registry, dropping its buffers.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        self.connections.try_remove(id.0)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains(id.0)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Snapshot of open connection ids, in slab order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|(id, _)| ConnectionId(id)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Connection<S>)> {
        self.connections.iter().map(|(id, conn)| (ConnectionId(id), conn))
    }

    /// Connections with no activity since `cutoff`.
    pub fn idle_since(&self, cutoff: Instant) -> Vec<ConnectionId> {
        self.iter()
            .filter(|(_, conn)| !conn.connecting && conn.last_active < cutoff)
            .map(|(id, _)| id)
            .collect()
    }
}
