//! # Teleop Bridge
//!
//! Drive small wheeled robots from gamepads over UDP.
//!
//! Usage: `teleop-bridge [config.toml]`
//!
//! Without an argument, `config/default.toml` is used when present and the
//! built-in defaults otherwise.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use teleop_bridge::config::{Config, LoggingConfig};
use teleop_bridge::Bridge;

/// Config file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for Teleop Bridge
///
/// # Control Flow
///
/// 1. Load configuration and set up logging
/// 2. Bind the command socket, register static robots
/// 3. Start detection, polling, liveness and discovery tasks
/// 4. Wait for Ctrl+C, then shut down (final stop to every robot)
///
/// # Errors
///
/// Returns error if the configuration is invalid or a socket cannot be bound.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args().nth(1).map(PathBuf::from))?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Teleop Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let bridge = Arc::new(
        Bridge::bind(config)
            .await
            .context("Failed to set up bridge")?,
    );
    bridge.start().await.context("Failed to start bridge")?;

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Received Ctrl+C, shutting down...");
    bridge.shutdown().await;

    let stats = bridge.network_stats();
    info!(
        "Total datagrams sent: {} ({} failed, {} dropped)",
        stats.datagrams_sent, stats.send_failures, stats.dropped
    );

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

/// Installs the global subscriber: stderr always, plus a daily-rolling file
/// when `log_dir` is set. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let (file_layer, guard) = if logging.log_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&logging.log_dir, "teleop-bridge.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install logger")?;

    Ok(guard)
}
