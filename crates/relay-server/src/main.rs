//! # Relay Server
//!
//! Real-time channel chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with a config file at ./relay.toml or /etc/relay/relay.toml
//! relay
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 RELAY_JWT_SECRET=... relay
//! ```

use anyhow::{bail, Result};
use relay_server::{config, metrics, routes};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    if config.auth.jwt_secret == config::PLACEHOLDER_JWT_SECRET {
        bail!("RELAY_JWT_SECRET must be set to a non-default value");
    }

    tracing::info!("Starting Relay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    routes::run_server(config).await?;

    Ok(())
}
