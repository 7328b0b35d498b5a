//! Tracing subscriber setup.
//!
//! Builds an [`EnvFilter`] from a default level plus per-target overrides
//! (`RUST_LOG` wins when set) and installs a pretty or JSON `fmt` layer.

#![deny(unsafe_code)]

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub level: Level,
    /// Per-target level overrides (e.g. `blockrelay_upstream` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of pretty text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Build from string levels, skipping entries that do not parse.
    pub fn from_names<'a, I>(level: &str, modules: I, json: bool) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let module_levels = modules
            .into_iter()
            .filter_map(|(target, lvl)| parse_level(lvl).map(|l| (target.to_string(), l)))
            .collect();
        Self {
            level: parse_level(level).unwrap_or(Level::INFO),
            module_levels,
            json,
        }
    }

    /// Filter directive string, e.g. `info,blockrelay_upstream=debug`.
    pub fn directives(&self) -> String {
        let mut filter = self.level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push(',');
            filter.push_str(module);
            filter.push('=');
            filter.push_str(&level.to_string().to_lowercase());
        }
        filter
    }
}

/// Parse a level name case-insensitively.
pub fn parse_level(name: &str) -> Option<Level> {
    Level::from_str(name.trim()).ok()
}

/// Install the global subscriber. Call once at startup.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        assert_eq!(LoggingConfig::default().directives(), "info");
    }

    #[test]
    fn module_levels_in_directives() {
        let cfg = LoggingConfig::from_names(
            "warn",
            [("blockrelay_upstream", "debug"), ("tower_http", "TRACE")],
            true,
        );
        assert_eq!(
            cfg.directives(),
            "warn,blockrelay_upstream=debug,tower_http=trace"
        );
        assert!(cfg.json);
    }

    #[test]
    fn invalid_levels_skipped() {
        let cfg = LoggingConfig::from_names("loud", [("x", "nope")], false);
        assert_eq!(cfg.level, Level::INFO);
        assert!(cfg.module_levels.is_empty());
    }

    #[test]
    fn parse_level_names() {
        assert_eq!(parse_level("ERROR"), Some(Level::ERROR));
        assert_eq!(parse_level(" debug "), Some(Level::DEBUG));
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        let cfg = LoggingConfig::default();
        let _ = init(&cfg);
        assert!(!init(&cfg));
    }
}
