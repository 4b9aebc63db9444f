//! Application protocols carried inside frames.
//!
//! - `echo`: reply with the received payload (inline or offloaded)
//! - `relay`: broadcast chat relay
//! - `greet`: timestamped greeting

pub mod echo;
pub mod greet;
pub mod relay;

pub use echo::Echo;
pub use greet::Greet;
pub use relay::Relay;

use crate::config::AppKind;
use crate::runtime::Application;

/// Build the application selected by configuration.
pub fn build(kind: AppKind) -> Box<dyn Application + Send> {
    match kind {
        AppKind::Echo => Box::new(Echo::new()),
        AppKind::EchoOffload => Box::new(Echo::offloaded()),
        AppKind::Relay => Box::new(Relay::new()),
        AppKind::Greet => Box::new(Greet::new()),
    }
}
