//! Greeting protocol.
//!
//! The server logs whatever the client sends and answers with the current
//! local time:
//!
//! ```text
//! Request:  "Hello, I'm client. "
//! Response: "Hello, I'm server. It's: Sat, 17 Oct 2026 09:30:00 +0000"
//! ```

use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use tracing::info;

use crate::runtime::{Application, ConnectionId, Context};

#[derive(Debug, Default)]
pub struct Greet;

impl Greet {
    pub fn new() -> Self {
        Self
    }
}

/// Build the greeting for a given instant.
pub fn greeting<Tz: TimeZone>(now: &DateTime<Tz>) -> Bytes
where
    Tz::Offset: std::fmt::Display,
{
    Bytes::from(format!("Hello, I'm server. It's: {}", now.to_rfc2822()))
}

impl Application for Greet {
    fn on_frame(
        &mut self,
        _ctx: &mut Context<'_>,
        conn: ConnectionId,
        payload: Bytes,
    ) -> Option<Bytes> {
        info!(
            conn_id = %conn,
            message = %String::from_utf8_lossy(&payload),
            "Received message"
        );
        Some(greeting(&Local::now()))
    }
}
