//! lenframe: length-prefixed frame server and client
//!
//! Server mode runs a single-threaded mio reactor serving one of:
//! - echo (inline or via the offload pool)
//! - chat relay
//! - greeting
//!
//! Client mode (`--connect`) sends one frame and prints the reply.
//! Configuration via CLI arguments or TOML file.

use lenframe::client::FrameClient;
use lenframe::config::Config;
use lenframe::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.connect {
        Some(_) => run_client(config),
        None => run_server(config),
    }
}

/// Serve frames on the configured listen address
fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen,
        app = ?config.app,
        max_frame_size = config.limits.max_frame_size,
        byte_order = ?config.limits.byte_order,
        idle_timeout = ?config.idle_timeout,
        "Starting lenframe server"
    );
    runtime::run(config)?;
    Ok(())
}

/// Send one frame and print the reply
fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let Some(addr) = config.connect else {
        return Ok(());
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        info!(peer = %addr, "Connecting");
        let mut client = FrameClient::connect(addr, config.limits).await?;
        let reply = client.request(config.message.as_bytes()).await?;
        println!("{}", String::from_utf8_lossy(&reply));
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
