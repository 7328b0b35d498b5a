//! Upstream errors.

use blockrelay_core::{ClassifyError, EventKind};
use thiserror::Error;

/// Failures of an upstream source or subscription.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The subscription could not be established.
    #[error("failed to start upstream: {0}")]
    StartFailed(String),
    /// The upstream process ended on its own.
    #[error("upstream exited: {0}")]
    Exited(String),
    /// Reading from the upstream failed.
    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The producer stopped with a terminal error.
    #[error("upstream terminated: {0}")]
    Terminated(String),
}

impl UpstreamError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartFailed(_) => "start_failed",
            Self::Exited(_) => "exited",
            Self::Io(_) => "io",
            Self::Terminated(_) => "terminated",
        }
    }
}

/// Why a record did not reach the broadcast queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The record did not classify.
    #[error("rejected event: {0}")]
    Rejected(#[from] ClassifyError),
    /// The queue was at capacity and the event was dropped.
    #[error("event queue full, dropped {0} event")]
    Full(EventKind),
    /// The broadcaster is gone.
    #[error("event queue closed")]
    Closed,
}
