//! Pusher-compatible WebSocket relay: entry point.
//!
//! Loads the TOML configuration, starts the WebSocket server and the
//! periodic statistics flush, and drains every connection on Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! relay-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Configuration file [default: relay.toml]
//!   --host   <HOST>   Override [server].host
//!   --port   <PORT>   Override [server].port
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable       | Description                        |
//! |----------------|------------------------------------|
//! | `RELAY_CONFIG` | Configuration file path            |
//! | `RELAY_HOST`   | Listener address                   |
//! | `RELAY_PORT`   | Listener port                      |
//! | `RUST_LOG`     | Log filter, overrides `log_level`  |

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_server::application::ports::StatisticsSink;
use relay_server::domain::RelayConfig;
use relay_server::infrastructure::{
    load_config, run_statistics_flush, RelayServer, TracingStatisticsSink,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Pusher-compatible WebSocket relay.
#[derive(Debug, Parser)]
#[command(
    name = "relay-server",
    about = "Pusher-compatible WebSocket channel relay",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// A missing file starts the relay with defaults and no applications.
    #[arg(long, default_value = "relay.toml", env = "RELAY_CONFIG")]
    config: PathBuf,

    /// Address to bind the WebSocket listener to.
    #[arg(long, env = "RELAY_HOST")]
    host: Option<String>,

    /// Port for the WebSocket listener.
    #[arg(long, env = "RELAY_PORT")]
    port: Option<u16>,
}

impl Cli {
    /// Applies `--host` / `--port` on top of the file configuration.
    fn apply_overrides(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    if config.apps.is_empty() {
        warn!("no applications configured; every connection will be rejected");
    }
    info!(
        "relay starting (environment={}, config={})",
        config.server.environment,
        cli.config.display()
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, draining connections");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let server = RelayServer::bind(&config).await?;
    let relay = server.relay();

    // ── Statistics flush ──────────────────────────────────────────────────────
    let sink: Arc<dyn StatisticsSink> = Arc::new(TracingStatisticsSink);
    let flush = tokio::spawn(run_statistics_flush(
        Arc::clone(&relay.statistics),
        sink,
        Duration::from_secs(config.statistics.interval_secs),
        Arc::clone(&running),
    ));

    // ── Main server loop ──────────────────────────────────────────────────────
    server.run(Arc::clone(&running)).await?;

    running.store(false, Ordering::Relaxed);
    flush.await.ok();

    info!("relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
