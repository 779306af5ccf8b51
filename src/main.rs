//! ws-ack: a WebSocket acknowledgement server
//!
//! Accepts WebSocket connections on a single path, logs every text or
//! binary message it receives, and answers each one with a fixed
//! acknowledgement.
//!
//! Features:
//! - Text payloads are logged (lossily decoded), binary payloads by length
//! - Per-connection replies in arrival order
//! - Configurable message and frame size limits
//! - Connection cap and graceful shutdown on Ctrl-C
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod handler;
mod server;

use config::Config;
use handler::AckHandler;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        path = %config.path,
        workers = ?config.workers,
        max_connections = config.max_connections,
        handshake_timeout = ?config.handshake_timeout,
        max_message_size = ?config.max_message_size,
        max_frame_size = ?config.max_frame_size,
        "Starting ws-ack server"
    );

    let runtime = build_runtime(config.workers)?;
    let server = Server::new(config, AckHandler);
    runtime.block_on(server.run())
}

/// Multi-threaded tokio runtime, one worker per core unless overridden.
fn build_runtime(workers: Option<usize>) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    builder.enable_all().build()
}
