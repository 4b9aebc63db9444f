//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! A single thread owns the poller, the listener, and every connection's
//! decode/encode state. Each wake-up walks the ready events once and routes
//! them through `dispatch`, a table keyed by `Readiness`.

use bytes::Bytes;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::{FrameError, Result};
use crate::runtime::application::{Action, Application, Context};
use crate::runtime::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::runtime::decoder::ReadOutcome;
use crate::runtime::encoder::FlushOutcome;
use crate::runtime::offload::OffloadPool;
use crate::runtime::token::{self, classify, EventFlags, Readiness, Target, LISTENER, WAKER};
use crate::wire::FrameLimits;

/// Loop-level state, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    WaitingForReadiness,
    Dispatching,
    Stopped,
}

/// Stops a running loop from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop for shutdown");
        }
    }
}

/// Single-threaded reactor serving one `Application`.
pub struct EventLoop<A> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionRegistry<TcpStream>,
    app: A,
    pool: OffloadPool,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    limits: FrameLimits,
    poll_interval: Duration,
    idle_timeout: Option<Duration>,
    state: LoopState,
}

impl<A: Application> EventLoop<A> {
    /// Bind the listener and prepare the poller, waker, and offload pool.
    pub fn bind(config: &Config, app: A) -> io::Result<Self> {
        let poll = Poll::new()?;

        let listener = create_listener(config.listen)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let pool = OffloadPool::new(config.offload_workers, Arc::clone(&waker))?;

        info!(
            addr = %local_addr,
            max_connections = config.max_connections,
            max_frame_size = config.limits.max_frame_size,
            byte_order = ?config.limits.byte_order,
            offload_workers = pool.workers(),
            "Event loop bound"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            local_addr,
            connections: ConnectionRegistry::new(config.max_connections),
            app,
            pool,
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            limits: config.limits,
            poll_interval: config.poll_interval,
            idle_timeout: config.idle_timeout,
            state: LoopState::Idle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until a `ShutdownHandle` fires or polling fails.
    ///
    /// Every remaining connection is closed on the way out.
    pub fn run(&mut self) -> io::Result<()> {
        // Without idle eviction there is no housekeeping to wake up for.
        let timeout = self.idle_timeout.map(|_| self.poll_interval);

        let result = loop {
            if self.shutdown.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(e) = self.turn(timeout) {
                error!(error = %e, "Poll failed");
                break Err(e);
            }
        };

        self.state = LoopState::Stopped;
        self.close_all();
        info!(addr = %self.local_addr, "Event loop stopped");
        result
    }

    /// One wait-and-dispatch iteration.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.state = LoopState::WaitingForReadiness;
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        self.state = LoopState::Dispatching;
        let events = std::mem::replace(&mut self.events, Events::with_capacity(0));
        for event in events.iter() {
            self.dispatch_event(event.token(), EventFlags::from(event));
        }
        self.events = events;

        self.evict_idle();
        self.state = LoopState::WaitingForReadiness;
        Ok(())
    }

    /// Open an outbound connection. Frames enqueued before the connect
    /// completes are held and flushed once it does.
    pub fn connect(&mut self, addr: SocketAddr) -> io::Result<ConnectionId> {
        if self.connections.is_full() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "connection limit reached",
            ));
        }

        let stream = TcpStream::connect(addr)?;
        let serial = self.connections.next_serial();
        let id = self
            .connections
            .insert(Connection::connecting(stream, addr, serial))
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "connection limit reached"))?;

        if let Err(e) = self.register(id, Interest::WRITABLE) {
            self.connections.remove(id);
            return Err(e);
        }
        debug!(conn_id = %id, peer = %addr, "Connecting");
        Ok(id)
    }

    /// Schedule `payload` for transmission to `id`, writing immediately if
    /// the socket allows.
    ///
    /// An oversized payload is rejected without affecting the connection.
    /// A write failure closes the connection and is returned.
    pub fn enqueue(&mut self, id: ConnectionId, payload: &[u8]) -> Result<()> {
        if !self.connections.contains(id) {
            return Err(FrameError::ConnectionClosed);
        }
        let frame = self.limits.encode(payload)?;
        self.push_frame(id, frame)
    }

    /// Queue an already encoded frame and flush.
    fn push_frame(&mut self, id: ConnectionId, frame: Bytes) -> Result<()> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or(FrameError::ConnectionClosed)?;
        conn.encoder.enqueue_encoded(frame);

        if conn.connecting {
            return Ok(());
        }
        if let Err(e) = self.flush(id) {
            self.close_with(id, &e);
            return Err(e);
        }
        Ok(())
    }

    fn dispatch_event(&mut self, token: Token, flags: EventFlags) {
        let target = Target::from_token(token);
        let connecting = match target {
            Target::Connection(id) => match self.connections.get(id) {
                Some(conn) => conn.connecting,
                // Closed earlier in this batch.
                None => return,
            },
            Target::Listener | Target::Waker => false,
        };

        for readiness in classify(target, flags, connecting).into_iter().flatten() {
            if let Err(e) = self.dispatch(target, readiness) {
                if let Target::Connection(id) = target {
                    self.close_with(id, &e);
                }
                break;
            }
        }
    }

    fn dispatch(&mut self, target: Target, readiness: Readiness) -> Result<()> {
        match (readiness, target) {
            (Readiness::Accept, _) => {
                self.accept_connections();
                Ok(())
            }
            (Readiness::Wake, _) => {
                self.apply_completions();
                Ok(())
            }
            (Readiness::Read, Target::Connection(id)) => self.handle_readable(id),
            (Readiness::Write, Target::Connection(id)) => self.handle_writable(id),
            (Readiness::Connect, Target::Connection(id)) => self.handle_connect(id),
            (kind, target) => {
                trace!(?kind, ?target, "Ignoring readiness");
                Ok(())
            }
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.is_full() {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    }

                    let serial = self.connections.next_serial();
                    let Some(id) = self
                        .connections
                        .insert(Connection::new(stream, peer, serial))
                    else {
                        continue;
                    };

                    if let Err(e) = self.register(id, Interest::READABLE) {
                        error!(conn_id = %id, error = %e, "Failed to register connection");
                        self.connections.remove(id);
                        continue;
                    }

                    debug!(conn_id = %id, peer = %peer, "Accepted connection");
                    self.notify_open(id);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, id: ConnectionId) -> Result<()> {
        let limits = self.limits;
        loop {
            let Some(conn) = self.connections.get_mut(id) else {
                return Ok(());
            };

            match conn.decoder.read_from(&mut conn.stream, &limits)? {
                ReadOutcome::Frame(payload) => {
                    conn.touch(Instant::now());
                    trace!(conn_id = %id, len = payload.len(), "Frame decoded");
                    self.deliver(id, payload);
                }
                ReadOutcome::NeedData => conn.touch(Instant::now()),
                ReadOutcome::WouldBlock => return Ok(()),
            }
        }
    }

    fn handle_writable(&mut self, id: ConnectionId) -> Result<()> {
        if !self.connections.contains(id) {
            return Ok(());
        }
        self.flush(id)
    }

    fn handle_connect(&mut self, id: ConnectionId) -> Result<()> {
        let Some(conn) = self.connections.get_mut(id) else {
            return Ok(());
        };

        if let Some(e) = conn.stream.take_error()? {
            return Err(e.into());
        }
        match conn.stream.peer_addr() {
            Ok(_) => {}
            // Spurious wake-up; keep waiting.
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        conn.connecting = false;
        conn.write_interest = false;
        conn.touch(Instant::now());
        let peer = conn.peer;
        self.poll.registry().reregister(
            &mut conn.stream,
            token::connection_token(id),
            Interest::READABLE,
        )?;

        debug!(conn_id = %id, peer = %peer, "Connected");
        self.notify_open(id);

        if self.connections.contains(id) {
            self.flush(id)?;
        }
        Ok(())
    }

    /// Write queued frames and keep WRITABLE interest in step with the queue.
    fn flush(&mut self, id: ConnectionId) -> Result<()> {
        let Some(conn) = self.connections.get_mut(id) else {
            return Ok(());
        };

        let token = token::connection_token(id);
        match conn.encoder.flush(&mut conn.stream)? {
            FlushOutcome::Pending if !conn.write_interest => {
                trace!(conn_id = %id, pending = conn.encoder.pending_bytes(), "Partial write");
                self.poll.registry().reregister(
                    &mut conn.stream,
                    token,
                    Interest::READABLE | Interest::WRITABLE,
                )?;
                conn.write_interest = true;
            }
            FlushOutcome::Drained if conn.write_interest => {
                self.poll
                    .registry()
                    .reregister(&mut conn.stream, token, Interest::READABLE)?;
                conn.write_interest = false;
            }
            FlushOutcome::Pending | FlushOutcome::Drained => {}
        }
        Ok(())
    }

    fn deliver(&mut self, id: ConnectionId, payload: Bytes) {
        let open = self.connections.ids();
        let mut ctx = Context::new(&open);
        let response = self.app.on_frame(&mut ctx, id, payload);

        let mut actions = ctx.into_actions();
        if let Some(response) = response {
            actions.push(Action::Enqueue(id, response));
        }
        self.apply_actions(actions);
    }

    fn notify_open(&mut self, id: ConnectionId) {
        let open = self.connections.ids();
        let mut ctx = Context::new(&open);
        self.app.on_open(&mut ctx, id);
        let actions = ctx.into_actions();
        self.apply_actions(actions);
    }

    fn notify_close(&mut self, id: ConnectionId) {
        let open = self.connections.ids();
        let mut ctx = Context::new(&open);
        self.app.on_close(&mut ctx, id);
        let actions = ctx.into_actions();
        self.apply_actions(actions);
    }

    fn apply_actions(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Enqueue(conn, payload) => self.enqueue_logged(conn, &payload),
                Action::Broadcast(payload) => self.broadcast(&payload),
                Action::Close(conn) => {
                    debug!(conn_id = %conn, "Closed by application");
                    self.close_connection(conn);
                }
                Action::Offload(conn, job) => {
                    let Some(serial) = self.connections.get(conn).map(|c| c.serial) else {
                        debug!(conn_id = %conn, "Offload for closed connection dropped");
                        continue;
                    };
                    if !self.pool.submit(conn, serial, job) {
                        warn!(conn_id = %conn, "Offload pool unavailable");
                    }
                }
            }
        }
    }

    fn enqueue_logged(&mut self, conn: ConnectionId, payload: &[u8]) {
        match self.enqueue(conn, payload) {
            Ok(()) => {}
            Err(e) if e.is_protocol_violation() => {
                warn!(conn_id = %conn, error = %e, "Outbound frame rejected");
            }
            Err(e) => debug!(conn_id = %conn, error = %e, "Enqueue failed"),
        }
    }

    /// Encode once and share the frame across every open connection.
    fn broadcast(&mut self, payload: &[u8]) {
        let frame = match self.limits.encode(payload) {
            Ok(frame) => frame,
            Err(v) => {
                warn!(error = %v, "Broadcast frame rejected");
                return;
            }
        };
        for conn in self.connections.ids() {
            if let Err(e) = self.push_frame(conn, frame.clone()) {
                debug!(conn_id = %conn, error = %e, "Broadcast enqueue failed");
            }
        }
    }

    fn apply_completions(&mut self) {
        for completion in self.pool.drain() {
            let live = self
                .connections
                .get_live_mut(completion.conn, completion.serial)
                .is_some();
            if !live {
                debug!(conn_id = %completion.conn, "Completion for closed connection dropped");
                continue;
            }
            if let Some(response) = completion.response {
                self.enqueue_logged(completion.conn, &response);
            }
        }
    }

    fn evict_idle(&mut self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let Some(cutoff) = Instant::now().checked_sub(timeout) else {
            return;
        };
        for id in self.connections.idle_since(cutoff) {
            info!(conn_id = %id, idle_secs = timeout.as_secs(), "Evicting idle connection");
            self.close_connection(id);
        }
    }

    fn register(&mut self, id: ConnectionId, interest: Interest) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(id) else {
            return Ok(());
        };
        self.poll
            .registry()
            .register(&mut conn.stream, token::connection_token(id), interest)?;
        conn.write_interest = interest.is_writable();
        Ok(())
    }

    fn close_with(&mut self, id: ConnectionId, err: &FrameError) {
        match err {
            FrameError::ProtocolViolation(v) => {
                warn!(conn_id = %id, error = %v, "Protocol violation, closing connection");
            }
            FrameError::ConnectionClosed => debug!(conn_id = %id, "Peer closed connection"),
            FrameError::Io(e) => debug!(conn_id = %id, error = %e, "Connection error"),
        }
        self.close_connection(id);
    }

    fn close_connection(&mut self, id: ConnectionId) {
        if let Some(mut conn) = self.connections.remove(id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(
                conn_id = %id,
                peer = %conn.peer,
                unsent_frames = conn.encoder.pending_frames(),
                "Connection closed"
            );
            drop(conn);
            self.notify_close(id);
        }
    }

    fn close_all(&mut self) {
        for id in self.connections.ids() {
            self.close_connection(id);
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
