//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Outbound frames buffered per client.
    pub client_queue_capacity: usize,
    /// Classified events buffered ahead of the relay loop.
    pub event_queue_capacity: usize,
    /// Ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Rebroadcast text frames received from clients.
    pub pass_through: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            client_queue_capacity: 64,
            event_queue_capacity: 256,
            ping_interval_secs: 30,
            pass_through: false,
        }
    }
}

impl ServerConfig {
    /// Ping interval, at least one second.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.client_queue_capacity, 64);
        assert!(!cfg.pass_through);
        assert_eq!(cfg.ping_interval(), Duration::from_secs(30));
    }

    #[test]
    fn zero_ping_interval_clamped() {
        let cfg = ServerConfig {
            ping_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.ping_interval(), Duration::from_secs(1));
    }

    #[test]
    fn deserialize_partial() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port":8080,"pass_through":true}"#).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.pass_through);
        assert_eq!(cfg.event_queue_capacity, 256);
    }
}
