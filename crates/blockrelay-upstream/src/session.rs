//! Lifecycle of one upstream subscription.
//!
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//!                         ↘ Failed
//! ```
//!
//! A session owns the producer task, its cancel token, and a watcher task
//! that waits on the subscription's error channel. Stopping is bounded: the
//! producer gets `stop_timeout` to exit after cancellation and is aborted
//! otherwise.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use blockrelay_core::SessionConfig;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UpstreamError;
use crate::metrics::{
    UPSTREAM_FAILURES_TOTAL, UPSTREAM_FORCED_STOPS_TOTAL, UPSTREAM_START_FAILURES_TOTAL,
    UPSTREAM_STARTS_TOTAL,
};
use crate::source::{RawEventHandler, UpstreamSource};

/// Default bound on how long a stop waits for the producer.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No producer is running.
    Stopped,
    /// The source is establishing the subscription.
    Starting,
    /// The producer is delivering records.
    Running,
    /// A stop is waiting for the producer to exit.
    Stopping,
    /// The producer reported a terminal error.
    Failed,
}

impl SessionState {
    /// Lowercase label, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared read-only view of a session's state.
///
/// Stays valid after the session is dropped, reporting its last state.
#[derive(Clone, Debug)]
pub struct StateHandle(Arc<Mutex<SessionState>>);

impl StateHandle {
    /// Current state.
    pub fn get(&self) -> SessionState {
        *self.0.lock()
    }
}

/// A running session reported a terminal error.
#[derive(Debug)]
pub struct SessionFailure {
    /// Generation of the session that failed.
    pub generation: u64,
    /// What ended it.
    pub error: UpstreamError,
}

/// How [`UpstreamSession::stop`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The producer exited within the timeout.
    Graceful,
    /// The producer or watcher was aborted after the timeout. It may still
    /// be running if it was blocked outside an await point.
    Forced,
    /// Nothing was running.
    AlreadyStopped,
}

/// Knobs for [`UpstreamSession::start`].
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// How long `stop` waits before aborting the producer.
    pub stop_timeout: Duration,
    /// Where watcher failure notices go.
    pub failures: Option<mpsc::UnboundedSender<SessionFailure>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            failures: None,
        }
    }
}

/// One subscription to an upstream source.
pub struct UpstreamSession {
    generation: u64,
    source: &'static str,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl UpstreamSession {
    /// Start a subscription on `source` and spawn its watcher.
    ///
    /// Only setup failures are returned; anything after the producer is
    /// running reaches the watcher instead.
    pub async fn start(
        generation: u64,
        config: &SessionConfig,
        source: &dyn UpstreamSource,
        handler: RawEventHandler,
        options: SessionOptions,
    ) -> Result<Self, UpstreamError> {
        let state = Arc::new(Mutex::new(SessionState::Starting));
        let source_name = source.name();
        debug!(
            generation,
            source = source_name,
            address = %config.address,
            "starting upstream session"
        );

        let subscription = match source.start(config, handler).await {
            Ok(sub) => sub,
            Err(e) => {
                *state.lock() = SessionState::Failed;
                counter!(UPSTREAM_START_FAILURES_TOTAL, "source" => source_name).increment(1);
                return Err(match e {
                    UpstreamError::StartFailed(_) => e,
                    other => UpstreamError::StartFailed(other.to_string()),
                });
            }
        };

        // Running must be visible before the watcher can record a failure.
        *state.lock() = SessionState::Running;
        let cancel = subscription.cancel.clone();
        let watcher = tokio::spawn(watch(
            generation,
            Arc::clone(&state),
            cancel.clone(),
            subscription.errors,
            options.failures,
        ));
        counter!(UPSTREAM_STARTS_TOTAL, "source" => source_name).increment(1);
        info!(
            generation,
            source = source_name,
            address = %config.address,
            event_types = %config.event_filter(),
            "upstream session running"
        );

        Ok(Self {
            generation,
            source: source_name,
            state,
            cancel,
            task: Some(subscription.task),
            watcher: Some(watcher),
            stop_timeout: options.stop_timeout,
        })
    }

    /// Generation assigned by the caller at start.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Name of the source this session runs on.
    pub fn source_name(&self) -> &'static str {
        self.source
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// A handle that reads this session's state.
    pub fn state_handle(&self) -> StateHandle {
        StateHandle(Arc::clone(&self.state))
    }

    /// Cancel the producer and wait (bounded) for it and the watcher.
    ///
    /// Repeated calls return [`StopOutcome::AlreadyStopped`].
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(mut task) = self.task.take() else {
            return StopOutcome::AlreadyStopped;
        };
        *self.state.lock() = SessionState::Stopping;
        self.cancel.cancel();

        let mut outcome = StopOutcome::Graceful;
        if tokio::time::timeout(self.stop_timeout, &mut task)
            .await
            .is_err()
        {
            warn!(
                generation = self.generation,
                timeout_ms = u64::try_from(self.stop_timeout.as_millis()).unwrap_or(u64::MAX),
                "upstream producer did not stop in time, aborting"
            );
            task.abort();
            outcome = StopOutcome::Forced;
        }

        if let Some(mut watcher) = self.watcher.take() {
            if tokio::time::timeout(self.stop_timeout, &mut watcher)
                .await
                .is_err()
            {
                warn!(generation = self.generation, "session watcher did not exit, aborting");
                watcher.abort();
                outcome = StopOutcome::Forced;
            }
        }

        if outcome == StopOutcome::Forced {
            counter!(UPSTREAM_FORCED_STOPS_TOTAL).increment(1);
        }
        *self.state.lock() = SessionState::Stopped;
        debug!(generation = self.generation, ?outcome, "upstream session stopped");
        outcome
    }
}

impl Drop for UpstreamSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

impl fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSession")
            .field("generation", &self.generation)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Wait for the subscription's single error report.
async fn watch(
    generation: u64,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    errors: oneshot::Receiver<UpstreamError>,
    failures: Option<mpsc::UnboundedSender<SessionFailure>>,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(generation, "session watcher cancelled");
        }
        report = errors => match report {
            Ok(error) if !cancel.is_cancelled() => {
                {
                    let mut current = state.lock();
                    if matches!(*current, SessionState::Starting | SessionState::Running) {
                        *current = SessionState::Failed;
                    }
                }
                cancel.cancel();
                error!(generation, error = %error, kind = error.kind(), "upstream session failed");
                counter!(UPSTREAM_FAILURES_TOTAL).increment(1);
                if let Some(tx) = failures {
                    let _ = tx.send(SessionFailure { generation, error });
                }
            }
            Ok(error) => {
                debug!(generation, error = %error, "ignoring error reported during stop");
            }
            Err(_) => {
                debug!(generation, "upstream producer finished without error");
            }
        }
    }
}
