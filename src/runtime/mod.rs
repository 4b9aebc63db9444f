//! Single-threaded reactor for length-prefixed frames.
//!
//! Built from small pieces that can be tested without sockets:
//! - `DecodeState`: per-connection frame reassembly
//! - `FrameEncoder`: outbound queue with partial-write resumption
//! - `ConnectionRegistry`: slab of connections owning the above
//! - `token`: readiness classification for the dispatch table
//! - `OffloadPool`: worker threads for blocking application work
//!
//! `EventLoop` wires them to mio.

mod application;
mod connection;
mod decoder;
mod encoder;
mod event_loop;
mod offload;
mod token;

pub use application::{Action, Application, Context, Job};
pub use connection::{Connection, ConnectionId, ConnectionRegistry};
pub use decoder::{DecodeState, Phase, ReadOutcome};
pub use encoder::{FlushOutcome, FrameEncoder};
pub use event_loop::{EventLoop, LoopState, ShutdownHandle};
pub use offload::{Completion, OffloadPool};
pub use token::{classify, EventFlags, Readiness, Target};

use crate::config::Config;
use crate::protocols;

/// Serve the configured application until the process is stopped.
pub fn run(config: Config) -> std::io::Result<()> {
    let app = protocols::build(config.app);
    let mut event_loop = EventLoop::bind(&config, app)?;
    event_loop.run()
}
