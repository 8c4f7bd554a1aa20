//! rovelink console
//!
//! Connects to the device, prints connection changes and inbound frames,
//! and sends operator commands read from stdin.

use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use rovelink_cli::args::Cli;
use rovelink_cli::console;
use rovelink_core::tracing_init::{default_filter, init_tracing};
use rovelink_session::{ConnectionManager, SessionConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    init_tracing(
        &default_filter("rovelink_cli", &config.logging.level),
        config.logging.json,
    );

    let session_config = SessionConfig::from_config(&config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %session_config.endpoint,
        "Starting rovelink console"
    );

    let manager = ConnectionManager::new(session_config);
    let _state = manager.add_connection_state_listener(console::print_state);
    let _messages = manager.add_message_listener(console::print_message);

    if !cli.no_connect
        && let Err(e) = manager.connect().await
    {
        warn!(error = %e, "Initial connection failed; use `connect` to retry");
    }

    console::run(&manager, BufReader::new(tokio::io::stdin())).await?;

    manager.disconnect();
    info!("Console closed");
    Ok(())
}
