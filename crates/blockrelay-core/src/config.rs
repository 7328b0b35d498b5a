//! Upstream subscription parameters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::events::EventKind;

/// Chain-sync node used when no address is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3001";

/// Cardano mainnet.
pub const DEFAULT_NETWORK_MAGIC: u32 = 764_824_073;

/// What the upstream session connects to and which event kinds it asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// `host:port` of the chain-sync node.
    pub address: String,
    /// Network identifier passed to the node handshake.
    pub network_magic: u32,
    /// Start following from the current tip instead of genesis.
    pub intersect_at_tip: bool,
    /// Wire tags passed to the upstream filter. Never empty.
    pub event_types: BTreeSet<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            network_magic: DEFAULT_NETWORK_MAGIC,
            intersect_at_tip: true,
            event_types: BTreeSet::from([EventKind::Block.as_str().to_owned()]),
        }
    }
}

impl SessionConfig {
    /// Replace the address. Blank input selects `fallback`.
    #[must_use]
    pub fn with_address(mut self, address: &str, fallback: &str) -> Self {
        let trimmed = address.trim();
        self.address = if trimmed.is_empty() {
            fallback.to_owned()
        } else {
            trimmed.to_owned()
        };
        self
    }

    /// Replace the event-type filter. Entries are trimmed and blanks dropped.
    pub fn with_event_types<I, S>(mut self, types: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = types
            .into_iter()
            .map(|t| t.as_ref().trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect();
        if set.is_empty() {
            return Err(ConfigError::EmptyEventTypes);
        }
        self.event_types = set;
        Ok(self)
    }

    /// Comma-joined filter, as passed to the upstream tool.
    pub fn event_filter(&self) -> String {
        self.event_types
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
