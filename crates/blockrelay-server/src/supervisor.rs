//! Serialized control of the upstream session.
//!
//! The supervisor owns the current [`SessionConfig`] and at most one
//! [`UpstreamSession`]. Every mutation happens under one async mutex, so a
//! restart always stops the previous session (producer and watcher) before
//! the next one starts. Readers use a snapshot that never waits on a
//! restart in progress.
//!
//! Public lifecycle calls run on their own task and the caller only awaits
//! its result, so dropping the caller's future never interrupts a restart.

use std::sync::Arc;
use std::time::Duration;

use blockrelay_core::config::DEFAULT_ADDRESS;
use blockrelay_core::{REFRESH_NOTICE, SessionConfig};
use blockrelay_upstream::{
    RawEventHandler, SessionFailure, SessionOptions, SessionState, StateHandle, StopOutcome,
    UpstreamSession, UpstreamSource,
};
use metrics::counter;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::SupervisorError;
use crate::metrics::SESSION_RESTARTS_TOTAL;
use crate::websocket::registry::ClientRegistry;

/// What to do when a running session fails on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Leave the session failed until an operator reconfigures it.
    #[default]
    Never,
    /// Restart after `min(initial * 2^(attempt-1), max)`, giving up after
    /// `max_attempts` consecutive automatic restarts.
    Backoff {
        /// Delay before the first restart.
        initial: Duration,
        /// Upper bound on any delay.
        max: Duration,
        /// Automatic restarts allowed before giving up.
        max_attempts: u32,
    },
}

impl RestartPolicy {
    /// Delay before automatic restart number `attempt` (1-based), or `None`
    /// when no restart should happen.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Never => None,
            Self::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if attempt == 0 || attempt > max_attempts {
                    return None;
                }
                let factor = 1u32 << (attempt - 1).min(31);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

/// Supervisor tuning.
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Address used when an update supplies a blank one.
    pub default_address: String,
    /// Bound on each session stop.
    pub stop_timeout: Duration,
    /// Reaction to a session failing on its own.
    pub restart: RestartPolicy,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            default_address: DEFAULT_ADDRESS.to_string(),
            stop_timeout: blockrelay_upstream::session::DEFAULT_STOP_TIMEOUT,
            restart: RestartPolicy::Never,
        }
    }
}

/// Point-in-time view of the supervisor.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    /// Current upstream address.
    pub address: String,
    /// Network identifier.
    pub network_magic: u32,
    /// Whether the session follows from the tip.
    pub intersect_at_tip: bool,
    /// Active event-type filter.
    pub event_types: Vec<String>,
    /// State of the current session, `stopped` when there is none.
    pub state: SessionState,
    /// Generation of the most recent start attempt. Zero before the first.
    pub generation: u64,
    /// Why the latest session failed or could not start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Inner {
    config: SessionConfig,
    session: Option<UpstreamSession>,
    generation: u64,
    /// Automatic restarts since the last operator action.
    attempts: u32,
}

#[derive(Clone)]
struct Snapshot {
    config: SessionConfig,
    generation: u64,
    state: Option<StateHandle>,
    last_error: Option<String>,
}

/// Owner of the upstream session lifecycle.
pub struct SessionSupervisor {
    source: Arc<dyn UpstreamSource>,
    handler: RawEventHandler,
    clients: Arc<ClientRegistry>,
    options: SupervisorOptions,
    inner: Mutex<Inner>,
    snapshot: RwLock<Snapshot>,
    failures_tx: mpsc::UnboundedSender<SessionFailure>,
    failures_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SessionFailure>>>,
}

impl SessionSupervisor {
    /// A supervisor holding `config` with no session yet.
    pub fn new(
        source: Arc<dyn UpstreamSource>,
        handler: RawEventHandler,
        clients: Arc<ClientRegistry>,
        config: SessionConfig,
        options: SupervisorOptions,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            source,
            handler,
            clients,
            options,
            snapshot: RwLock::new(Snapshot {
                config: config.clone(),
                generation: 0,
                state: None,
                last_error: None,
            }),
            inner: Mutex::new(Inner {
                config,
                session: None,
                generation: 0,
                attempts: 0,
            }),
            failures_tx,
            failures_rx: parking_lot::Mutex::new(Some(failures_rx)),
        }
    }

    /// Start a session with the current configuration. Returns its generation.
    pub async fn start(self: &Arc<Self>) -> Result<u64, SupervisorError> {
        let this = Arc::clone(self);
        join(tokio::spawn(async move { this.start_serialized().await })).await
    }

    /// Stop and clear the current session.
    pub async fn stop(self: &Arc<Self>) -> StopOutcome {
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.stop_serialized().await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "supervisor stop task failed");
                StopOutcome::Forced
            }
        }
    }

    /// Point the session at `address` and restart. A blank address selects
    /// the configured default.
    pub async fn update_address(self: &Arc<Self>, address: &str) -> Result<u64, SupervisorError> {
        let this = Arc::clone(self);
        let address = address.to_owned();
        join(tokio::spawn(async move { this.reconfigure_address(&address).await })).await
    }

    /// Replace the event-type filter and restart.
    ///
    /// An empty filter is rejected before anything changes.
    pub async fn update_event_types<I, S>(self: &Arc<Self>, types: I) -> Result<u64, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let this = Arc::clone(self);
        let types: Vec<String> = types.into_iter().map(|t| t.as_ref().to_owned()).collect();
        join(tokio::spawn(async move { this.reconfigure_event_types(types).await })).await
    }

    /// Stop the current session, if any, and start a new one.
    pub async fn restart(self: &Arc<Self>) -> Result<u64, SupervisorError> {
        let this = Arc::clone(self);
        join(tokio::spawn(async move {
            let mut inner = this.inner.lock().await;
            inner.attempts = 0;
            this.restart_locked(&mut inner, "manual").await
        }))
        .await
    }

    /// Configuration of the latest start.
    pub fn config(&self) -> SessionConfig {
        self.snapshot.read().config.clone()
    }

    /// Snapshot for the status endpoint.
    pub fn status(&self) -> SupervisorStatus {
        let snap = self.snapshot.read().clone();
        SupervisorStatus {
            address: snap.config.address,
            network_magic: snap.config.network_magic,
            intersect_at_tip: snap.config.intersect_at_tip,
            event_types: snap.config.event_types.into_iter().collect(),
            state: snap.state.map_or(SessionState::Stopped, |h| h.get()),
            generation: snap.generation,
            last_error: snap.last_error,
        }
    }

    /// State of the current session.
    pub fn state(&self) -> SessionState {
        self.snapshot
            .read()
            .state
            .as_ref()
            .map_or(SessionState::Stopped, StateHandle::get)
    }

    /// Spawn the task that records failure notices and applies the restart
    /// policy to them.
    ///
    /// Returns `None` when already spawned.
    pub fn spawn_recovery(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let rx = self.failures_rx.lock().take()?;
        let supervisor = Arc::clone(self);
        Some(tokio::spawn(async move {
            supervisor.run_recovery(rx, cancel).await;
        }))
    }

    async fn start_serialized(&self) -> Result<u64, SupervisorError> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }
        inner.attempts = 0;
        self.start_locked(&mut inner).await
    }

    async fn stop_serialized(&self) -> StopOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = match inner.session.take() {
            Some(mut session) => session.stop().await,
            None => StopOutcome::AlreadyStopped,
        };
        self.snapshot.write().state = None;
        outcome
    }

    async fn reconfigure_address(&self, address: &str) -> Result<u64, SupervisorError> {
        let mut inner = self.inner.lock().await;
        inner.config = inner
            .config
            .clone()
            .with_address(address, &self.options.default_address);
        inner.attempts = 0;
        info!(address = %inner.config.address, "upstream address updated");
        self.restart_locked(&mut inner, "address").await
    }

    async fn reconfigure_event_types(&self, types: Vec<String>) -> Result<u64, SupervisorError> {
        let mut inner = self.inner.lock().await;
        let config = inner.config.clone().with_event_types(types)?;
        inner.config = config;
        inner.attempts = 0;
        info!(event_types = %inner.config.event_filter(), "event type filter updated");
        self.restart_locked(&mut inner, "event_types").await
    }

    async fn restart_locked(
        &self,
        inner: &mut Inner,
        trigger: &'static str,
    ) -> Result<u64, SupervisorError> {
        if let Some(mut session) = inner.session.take() {
            let previous = session.generation();
            if session.stop().await == StopOutcome::Forced {
                warn!(
                    generation = previous,
                    "previous upstream session was aborted, it may briefly overlap the new one"
                );
            }
        }
        counter!(SESSION_RESTARTS_TOTAL, "trigger" => trigger).increment(1);
        let generation = self.start_locked(inner).await?;
        let _ = self.clients.broadcast_text(REFRESH_NOTICE).await;
        Ok(generation)
    }

    async fn start_locked(&self, inner: &mut Inner) -> Result<u64, SupervisorError> {
        inner.generation += 1;
        let generation = inner.generation;
        {
            let mut snap = self.snapshot.write();
            snap.config = inner.config.clone();
            snap.generation = generation;
            snap.state = None;
        }

        let options = SessionOptions {
            stop_timeout: self.options.stop_timeout,
            failures: Some(self.failures_tx.clone()),
        };
        match UpstreamSession::start(
            generation,
            &inner.config,
            self.source.as_ref(),
            Arc::clone(&self.handler),
            options,
        )
        .await
        {
            Ok(session) => {
                let mut snap = self.snapshot.write();
                snap.state = Some(session.state_handle());
                snap.last_error = None;
                drop(snap);
                inner.session = Some(session);
                Ok(generation)
            }
            Err(e) => {
                error!(generation, error = %e, "upstream session failed to start");
                self.snapshot.write().last_error = Some(e.to_string());
                Err(SupervisorError::Upstream(e))
            }
        }
    }

    async fn run_recovery(
        &self,
        mut failures: mpsc::UnboundedReceiver<SessionFailure>,
        cancel: CancellationToken,
    ) {
        loop {
            let failure = tokio::select! {
                () = cancel.cancelled() => break,
                failure = failures.recv() => match failure {
                    Some(f) => f,
                    None => break,
                },
            };
            {
                let mut snap = self.snapshot.write();
                if snap.generation == failure.generation {
                    snap.last_error = Some(failure.error.to_string());
                }
            }
            if self.options.restart == RestartPolicy::Never {
                info!(generation = failure.generation, "automatic restart disabled, session stays failed");
                continue;
            }
            if !self.recover(failure.generation, &cancel).await {
                break;
            }
        }
        debug!("session recovery stopped");
    }

    /// Restart after the failure of `generation`. Returns `false` when
    /// cancelled.
    async fn recover(&self, mut generation: u64, cancel: &CancellationToken) -> bool {
        loop {
            let attempt = {
                let mut inner = self.inner.lock().await;
                if !Self::still_failed(&inner, generation) {
                    debug!(generation, "ignoring stale session failure");
                    return true;
                }
                inner.attempts += 1;
                inner.attempts
            };
            let Some(delay) = self.options.restart.delay(attempt) else {
                error!(generation, attempt, "giving up on automatic upstream restart");
                return true;
            };
            warn!(
                generation,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "restarting failed upstream session"
            );
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(delay) => {}
            }

            let mut inner = self.inner.lock().await;
            if !Self::still_failed(&inner, generation) {
                debug!(generation, "session changed while waiting to restart");
                return true;
            }
            match self.restart_locked(&mut inner, "recovery").await {
                Ok(next) => {
                    info!(generation = next, attempt, "upstream session recovered");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "automatic restart failed");
                    generation = inner.generation;
                }
            }
        }
    }

    /// `generation` is current and has no healthy session.
    fn still_failed(inner: &Inner, generation: u64) -> bool {
        inner.generation == generation
            && inner
                .session
                .as_ref()
                .is_none_or(|s| s.state() == SessionState::Failed)
    }
}

/// Await a spawned lifecycle task.
async fn join<T>(task: JoinHandle<Result<T, SupervisorError>>) -> Result<T, SupervisorError> {
    task.await
        .map_err(|e| SupervisorError::Interrupted(e.to_string()))?
}
