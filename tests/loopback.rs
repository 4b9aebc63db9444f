//! Loopback integration tests for the event loop.
//!
//! Each test runs a real reactor on 127.0.0.1 in its own thread and talks
//! to it with blocking std sockets (or the async client).

use bytes::Bytes;
use lenframe::client::FrameClient;
use lenframe::config::Config;
use lenframe::protocols::{Echo, Relay};
use lenframe::runtime::{Application, ConnectionId, Context, EventLoop, ShutdownHandle};
use lenframe::FrameLimits;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Server {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    join: Option<JoinHandle<io::Result<()>>>,
}

impl Server {
    fn stop(mut self) -> io::Result<()> {
        self.shutdown.shutdown();
        self.join.take().unwrap().join().unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.shutdown.shutdown();
            let _ = join.join();
        }
    }
}

fn test_config() -> Config {
    Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        offload_workers: 1,
        ..Config::default()
    }
}

/// Bind and run a loop on its own thread; `setup` runs on that thread
/// before the first poll.
fn spawn_with<A, F, S>(config: Config, make_app: F, setup: S) -> Server
where
    A: Application + 'static,
    F: FnOnce() -> A + Send + 'static,
    S: FnOnce(&mut EventLoop<A>) + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let join = thread::spawn(move || {
        let mut event_loop = EventLoop::bind(&config, make_app())?;
        setup(&mut event_loop);
        let _ = tx.send((event_loop.local_addr(), event_loop.shutdown_handle()));
        event_loop.run()
    });

    let (addr, shutdown) = rx.recv_timeout(TIMEOUT).expect("event loop failed to bind");
    Server {
        addr,
        shutdown,
        join: Some(join),
    }
}

fn spawn<A, F>(config: Config, make_app: F) -> Server
where
    A: Application + 'static,
    F: FnOnce() -> A + Send + 'static,
{
    spawn_with(config, make_app, |_| {})
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    let mut wire = (payload.len() as u32).to_be_bytes().to_vec();
    wire.extend_from_slice(payload);
    stream.write_all(&wire).unwrap();
}

fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let mut body = vec![0u8; u32::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut body)?;
    Ok(body)
}

/// True once the server has closed the socket.
fn is_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::ConnectionReset,
    }
}

#[test]
fn test_echo_reassembles_fragmented_frame() {
    let server = spawn(test_config(), Echo::new);
    let mut client = connect(server.addr);

    let pieces: [&[u8]; 3] = [&[0x00, 0x00], &[0x00, 0x05, b'h'], b"ello"];
    for piece in pieces {
        client.write_all(piece).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(read_frame(&mut client).unwrap(), b"hello");
    server.stop().unwrap();
}

#[test]
fn test_echo_many_frames_in_order() {
    let server = spawn(test_config(), Echo::new);
    let mut client = connect(server.addr);

    let mut batch = Vec::new();
    for i in 0..50u32 {
        let payload = format!("message-{i}");
        batch.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        batch.extend_from_slice(payload.as_bytes());
    }
    // Trailing zero-length frame.
    batch.extend_from_slice(&[0, 0, 0, 0]);
    client.write_all(&batch).unwrap();

    for i in 0..50u32 {
        assert_eq!(read_frame(&mut client).unwrap(), format!("message-{i}").as_bytes());
    }
    assert!(read_frame(&mut client).unwrap().is_empty());
}

#[test]
fn test_large_frame_survives_partial_writes() {
    let server = spawn(test_config(), Echo::new);
    let mut client = connect(server.addr);

    // Larger than typical socket buffers, so the server's writes go partial.
    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let mut writer = client.try_clone().unwrap();
    let sent = payload.clone();
    let sender = thread::spawn(move || write_frame(&mut writer, &sent));

    let echoed = read_frame(&mut client).unwrap();
    sender.join().unwrap();
    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload);
}

#[test]
fn test_offloaded_echo() {
    let config = Config {
        offload_workers: 2,
        ..test_config()
    };
    let server = spawn(config, Echo::offloaded);
    let mut client = connect(server.addr);

    for i in 0..5 {
        let payload = format!("job-{i}");
        write_frame(&mut client, payload.as_bytes());
        assert_eq!(read_frame(&mut client).unwrap(), payload.as_bytes());
    }
}

/// Pipelined requests must come back in request order even when several
/// workers are producing replies.
#[test]
fn test_offloaded_echo_preserves_pipelined_order() {
    let config = Config {
        offload_workers: 8,
        ..test_config()
    };
    let server = spawn(config, Echo::offloaded);
    let mut client = connect(server.addr);

    const COUNT: usize = 5000;
    let mut writer = client.try_clone().unwrap();
    let sender = thread::spawn(move || {
        let mut batch = Vec::new();
        for i in 0..COUNT {
            let payload = format!("m{i}");
            batch.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            batch.extend_from_slice(payload.as_bytes());
        }
        writer.write_all(&batch).unwrap();
    });

    for i in 0..COUNT {
        let reply = read_frame(&mut client).unwrap();
        assert_eq!(
            String::from_utf8_lossy(&reply),
            format!("m{i}"),
            "reply {i} out of order"
        );
    }
    sender.join().unwrap();
}

#[test]
fn test_relay_broadcasts_to_every_connection() {
    let server = spawn(test_config(), Relay::new);

    let mut alice = connect(server.addr);
    write_frame(&mut alice, b"alice here");
    let own = read_frame(&mut alice).unwrap();
    assert!(own.ends_with(b"] alice here"));

    let mut bob = connect(server.addr);
    write_frame(&mut bob, b"bob here");
    assert!(read_frame(&mut bob).unwrap().ends_with(b"] bob here"));
    assert!(read_frame(&mut alice).unwrap().ends_with(b"] bob here"));

    write_frame(&mut alice, b"hi all");
    let to_alice = read_frame(&mut alice).unwrap();
    let to_bob = read_frame(&mut bob).unwrap();
    assert_eq!(to_alice, to_bob);
    assert!(to_bob.starts_with(b"[conn-"));
    assert!(to_bob.ends_with(b"] hi all"));
}

#[test]
fn test_protocol_violation_only_closes_offender() {
    let server = spawn(test_config(), Echo::new);

    let mut good = connect(server.addr);
    let mut bad = connect(server.addr);

    bad.write_all(&[0xff, 0xff, 0xff, 0xfb]).unwrap();
    assert!(is_closed(&mut bad));

    write_frame(&mut good, b"still here");
    assert_eq!(read_frame(&mut good).unwrap(), b"still here");
}

#[test]
fn test_oversized_frame_closes_connection() {
    let config = Config {
        limits: FrameLimits {
            max_frame_size: 8,
            ..FrameLimits::default()
        },
        ..test_config()
    };
    let server = spawn(config, Echo::new);
    let mut client = connect(server.addr);

    write_frame(&mut client, b"eight..!");
    assert_eq!(read_frame(&mut client).unwrap(), b"eight..!");

    client.write_all(&[0, 0, 0, 9]).unwrap();
    assert!(is_closed(&mut client));
}

#[test]
fn test_idle_connection_evicted() {
    let config = Config {
        idle_timeout: Some(Duration::from_millis(200)),
        poll_interval: Duration::from_millis(20),
        ..test_config()
    };
    let server = spawn(config, Echo::new);
    let mut client = connect(server.addr);

    assert!(is_closed(&mut client));
}

/// Forwards every received frame to the test thread.
struct Recorder {
    frames: mpsc::Sender<Bytes>,
}

impl Application for Recorder {
    fn on_frame(
        &mut self,
        _ctx: &mut Context<'_>,
        _conn: ConnectionId,
        payload: Bytes,
    ) -> Option<Bytes> {
        let _ = self.frames.send(payload);
        None
    }
}

#[test]
fn test_outbound_connect_flushes_queued_frames() {
    let echo = spawn(test_config(), Echo::new);
    let target = echo.addr;

    let (tx, rx) = mpsc::channel();
    let client_side = spawn_with(
        test_config(),
        move || Recorder { frames: tx },
        move |event_loop| {
            let conn = event_loop.connect(target).unwrap();
            // Queued while the connect is still in flight.
            event_loop.enqueue(conn, b"ping").unwrap();
            event_loop.enqueue(conn, b"pong").unwrap();
        },
    );

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Bytes::from_static(b"ping"));
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Bytes::from_static(b"pong"));
    client_side.stop().unwrap();
}

#[test]
fn test_async_client_against_reactor() {
    let server = spawn(test_config(), Echo::new);
    let addr = server.addr;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async move {
        let mut client = FrameClient::connect(addr, FrameLimits::default())
            .await
            .unwrap();
        let reply = client.request(b"from tokio").await.unwrap();
        assert_eq!(reply, Bytes::from_static(b"from tokio"));

        let empty = client.request(b"").await.unwrap();
        assert!(empty.is_empty());
    });
}

#[test]
fn test_shutdown_closes_clients() {
    let server = spawn(test_config(), Echo::new);
    let mut client = connect(server.addr);
    write_frame(&mut client, b"before");
    assert_eq!(read_frame(&mut client).unwrap(), b"before");

    server.stop().unwrap();
    assert!(is_closed(&mut client));
}
