//! Settings sections.

use std::collections::BTreeMap;

use blockrelay_core::SessionConfig;
use blockrelay_core::config::{DEFAULT_ADDRESS, DEFAULT_NETWORK_MAGIC};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.blockrelay/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and fan-out.
    pub server: ServerSettings,
    /// Chain-sync source.
    pub upstream: UpstreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Initial upstream configuration. Fails when the event-type list is
    /// empty after trimming.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let base = SessionConfig {
            network_magic: self.upstream.network_magic,
            intersect_at_tip: self.upstream.intersect_at_tip,
            ..SessionConfig::default()
        }
        .with_address(&self.upstream.address, DEFAULT_ADDRESS);
        base.with_event_types(&self.upstream.event_types)
            .map_err(|e| SettingsError::InvalidValue(format!("upstream.eventTypes: {e}")))
    }
}

/// HTTP listener and fan-out tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Frames buffered per client before drops start.
    pub client_queue_capacity: usize,
    /// Classified events buffered between the upstream and the broadcaster.
    pub event_queue_capacity: usize,
    /// WebSocket ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Upper bound on a session stop before the producer is aborted.
    pub stop_timeout_ms: u64,
    /// Rebroadcast client text frames to every client.
    pub pass_through: bool,
    /// Automatic restart after a failure.
    pub restart: RestartSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            client_queue_capacity: 64,
            event_queue_capacity: 256,
            ping_interval_secs: 30,
            stop_timeout_ms: 5_000,
            pass_through: false,
            restart: RestartSettings::default(),
        }
    }
}

/// Automatic restart after an upstream failure. Off by default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartSettings {
    /// Turn automatic restarts on.
    pub enabled: bool,
    /// Delay before the first restart.
    pub initial_delay_ms: u64,
    /// Cap on the doubling delay.
    pub max_delay_ms: u64,
    /// Restarts attempted before giving up.
    pub max_attempts: u32,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

/// Upstream chain-sync source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// `host:port` of the node. Blank selects the built-in default.
    pub address: String,
    /// Network identifier.
    pub network_magic: u32,
    /// Follow from the tip instead of genesis.
    pub intersect_at_tip: bool,
    /// Event kinds to request.
    pub event_types: Vec<String>,
    /// Path or name of the `snek` executable.
    pub snek_bin: String,
    /// Arguments appended after the generated input and filter flags.
    pub extra_args: Vec<String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            address: session.address,
            network_magic: DEFAULT_NETWORK_MAGIC,
            intersect_at_tip: session.intersect_at_tip,
            event_types: session.event_types.into_iter().collect(),
            snek_bin: "snek".to_string(),
            extra_args: vec!["-output".to_string(), "log".to_string()],
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Log level and format.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Per-target overrides, e.g. `{"blockrelay_upstream": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            modules: BTreeMap::new(),
        }
    }
}
