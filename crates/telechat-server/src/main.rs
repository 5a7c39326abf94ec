//! # telechat
//!
//! Multi-client telnet chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! telechat
//!
//! # Run with custom config
//! telechat --config /path/to/telechat.toml
//!
//! # Run with environment variables
//! TELECHAT_TELNET_PORT=2323 TELECHAT_MAX_CLIENTS=10 telechat
//! ```

use anyhow::Result;
use clap::Parser;
use telechat_server::{logging, metrics, run_server, Args, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize tracing
    let _log_guard = logging::init_tracing(&config.logging)?;

    tracing::info!(
        "Starting telechat on {}:{} (http: {})",
        config.host,
        config.telnet_port,
        if config.http.enabled {
            config.http.port.to_string()
        } else {
            "disabled".to_string()
        }
    );

    // Initialize metrics
    metrics::init_metrics();

    run_server(config).await?;

    Ok(())
}
