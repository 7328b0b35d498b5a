//! Error types for classification and configuration.

use thiserror::Error;

/// Why a raw upstream record could not be turned into an [`Event`](crate::Event).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClassifyError {
    /// The discriminant was absent, not a string, empty, or not a known kind.
    #[error("unrecognized event: {0}")]
    Unrecognized(String),
    /// The kind was known but the record did not match its schema.
    #[error("malformed {kind} event: {reason}")]
    Malformed {
        /// Wire tag of the recognized kind.
        kind: &'static str,
        /// Decoder message.
        reason: String,
    },
}

impl ClassifyError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unrecognized(_) => "unrecognized",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Rejected session configuration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The event-type filter would be empty.
    #[error("event type filter must contain at least one type")]
    EmptyEventTypes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_display() {
        let err = ClassifyError::Unrecognized("missing kind".into());
        assert_eq!(err.to_string(), "unrecognized event: missing kind");
        assert_eq!(err.reason(), "unrecognized");
    }

    #[test]
    fn malformed_display() {
        let err = ClassifyError::Malformed {
            kind: "chainsync.block",
            reason: "missing field `blockNumber`".into(),
        };
        assert!(err.to_string().starts_with("malformed chainsync.block event"));
        assert_eq!(err.reason(), "malformed");
    }

    #[test]
    fn config_error_display() {
        assert_eq!(
            ConfigError::EmptyEventTypes.to_string(),
            "event type filter must contain at least one type"
        );
    }
}
