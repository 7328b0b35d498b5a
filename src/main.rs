//! # blockrelay
//!
//! Relay server binary: loads settings, starts the upstream session and
//! serves the `WebSocket` fan-out until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use blockrelay_logging::LoggingConfig;
use blockrelay_server::{RelayServer, RestartPolicy, ServerConfig, SupervisorOptions};
use blockrelay_settings::{LogFormat, RelaySettings};
use blockrelay_upstream::CommandSource;
use clap::Parser;

/// Relay live chain-sync events to browser clients.
#[derive(Parser, Debug)]
#[command(name = "blockrelay", about = "Chain-sync event relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Chain-sync node `host:port` (overrides settings).
    #[arg(long)]
    address: Option<String>,

    /// Settings file (default `~/.blockrelay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,

    /// Rebroadcast text frames sent by clients.
    #[arg(long)]
    pass_through: bool,
}

impl Cli {
    fn apply(self, settings: &mut RelaySettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(address) = self.address {
            settings.upstream.address = address;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
        if self.pass_through {
            settings.server.pass_through = true;
        }
    }
}

fn logging_config(settings: &RelaySettings) -> LoggingConfig {
    LoggingConfig::from_names(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(target, level)| (target.as_str(), level.as_str())),
        settings.logging.format == LogFormat::Json,
    )
}

fn server_config(settings: &RelaySettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        client_queue_capacity: server.client_queue_capacity,
        event_queue_capacity: server.event_queue_capacity,
        ping_interval_secs: server.ping_interval_secs,
        pass_through: server.pass_through,
    }
}

fn supervisor_options(settings: &RelaySettings) -> SupervisorOptions {
    let restart = &settings.server.restart;
    let policy = if restart.enabled {
        RestartPolicy::Backoff {
            initial: Duration::from_millis(restart.initial_delay_ms),
            max: Duration::from_millis(restart.max_delay_ms.max(restart.initial_delay_ms)),
            max_attempts: restart.max_attempts,
        }
    } else {
        RestartPolicy::Never
    };
    SupervisorOptions {
        stop_timeout: Duration::from_millis(settings.server.stop_timeout_ms),
        restart: policy,
        ..SupervisorOptions::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(blockrelay_settings::settings_path);
    let mut settings = blockrelay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    let _ = blockrelay_logging::init(&logging_config(&settings));

    let metrics = match blockrelay_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let session = settings
        .session_config()
        .context("Invalid upstream settings")?;
    let source = CommandSource::new(&settings.upstream.snek_bin)
        .with_extra_args(settings.upstream.extra_args.clone());

    let server = RelayServer::new(
        server_config(&settings),
        Arc::new(source),
        session,
        supervisor_options(&settings),
        metrics,
    );

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("blockrelay listening on http://{addr} (websocket at /ws)");

    // The relay stays up without an upstream so operators can fix the
    // address over the API.
    if let Err(e) = server.supervisor().start().await {
        tracing::error!(error = %e, "initial upstream session failed to start");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let timeout = Duration::from_millis(settings.server.stop_timeout_ms.saturating_mul(2));
    if !server.stop(Some(timeout)).await {
        tracing::warn!("background tasks did not finish in time");
    }
    if tokio::time::timeout(timeout, handle).await.is_err() {
        tracing::warn!("http server did not finish in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
