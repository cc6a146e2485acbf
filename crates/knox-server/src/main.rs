//! # Knox Server
//!
//! Room-based realtime chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! KNOX_AUTH__JWT_SECRET=change-me knox
//!
//! # Run with custom config
//! knox --config /path/to/knox.toml
//!
//! # Override any setting through the environment
//! KNOX_PORT=8080 KNOX_STORE__URL=memory knox
//!
//! # Show the effective configuration and exit
//! knox --print-config
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod store;

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "knox=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(config_path_from_args().as_deref())?;

    if std::env::args().any(|arg| arg == "--print-config") {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!("Starting Knox server on {}:{}", config.host, config.port);

    handlers::run_server(config).await?;

    Ok(())
}

/// `--config <path>` or `--config=<path>`.
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}
