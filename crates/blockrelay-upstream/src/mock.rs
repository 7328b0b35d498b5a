//! Scriptable in-process source.
//!
//! Each `start` creates a subscription that stays up until cancelled.
//! Tests feed it records with [`MockSource::emit`], end it with
//! [`MockSource::fail`], or make it ignore cancellation with
//! [`MockSource::set_hang_on_stop`]. [`MockSource::fail_next_subscription`]
//! makes the next producer report its error as soon as it runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use blockrelay_core::SessionConfig;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::UpstreamError;
use crate::source::{RawEventHandler, Subscription, UpstreamSource};

/// In-process [`UpstreamSource`] for tests.
#[derive(Clone, Default)]
pub struct MockSource {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<MockState>,
    starts: AtomicUsize,
    live: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    current: Option<Current>,
    fail_next_start: Option<String>,
    fail_next_subscription: Option<UpstreamError>,
    hang_on_stop: bool,
    last_config: Option<SessionConfig>,
}

struct Current {
    id: u64,
    handler: RawEventHandler,
    fail: Option<oneshot::Sender<UpstreamError>>,
}

/// Decrements the live count and forgets the subscription when the producer
/// future is dropped, whether it returned or was aborted.
struct LiveGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let _ = self.inner.live.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.inner.state.lock();
        if state.current.as_ref().is_some_and(|c| c.id == self.id) {
            state.current = None;
        }
    }
}

impl MockSource {
    /// A source with no subscription yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw record to the current subscription. Returns `false` when
    /// none is running.
    pub fn emit(&self, raw: Value) -> bool {
        let handler = self
            .inner
            .state
            .lock()
            .current
            .as_ref()
            .map(|c| Arc::clone(&c.handler));
        match handler {
            Some(handler) => {
                handler(raw);
                true
            }
            None => false,
        }
    }

    /// End the current subscription with `error`.
    pub fn fail(&self, error: UpstreamError) -> bool {
        let sender = self
            .inner
            .state
            .lock()
            .current
            .as_mut()
            .and_then(|c| c.fail.take());
        sender.is_some_and(|tx| tx.send(error).is_ok())
    }

    /// Make the next `start` fail with `StartFailed(message)`.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        self.inner.state.lock().fail_next_start = Some(message.into());
    }

    /// Make the next successful `start` hand back a producer that reports
    /// `error` immediately.
    pub fn fail_next_subscription(&self, error: UpstreamError) {
        self.inner.state.lock().fail_next_subscription = Some(error);
    }

    /// Subscriptions started from now on ignore cancellation.
    pub fn set_hang_on_stop(&self, hang: bool) {
        self.inner.state.lock().hang_on_stop = hang;
    }

    /// Successful starts so far.
    pub fn start_count(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    /// Producers whose future has not yet been dropped.
    pub fn live_count(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Configuration passed to the most recent `start`, successful or not.
    pub fn last_config(&self) -> Option<SessionConfig> {
        self.inner.state.lock().last_config.clone()
    }

    /// A subscription is current.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().current.is_some()
    }
}

#[async_trait]
impl UpstreamSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(
        &self,
        config: &SessionConfig,
        handler: RawEventHandler,
    ) -> Result<Subscription, UpstreamError> {
        let (id, hang, fail_rx, early) = {
            let mut state = self.inner.state.lock();
            state.last_config = Some(config.clone());
            if let Some(message) = state.fail_next_start.take() {
                return Err(UpstreamError::StartFailed(message));
            }
            state.next_id += 1;
            let id = state.next_id;
            let (fail_tx, fail_rx) = oneshot::channel();
            state.current = Some(Current {
                id,
                handler,
                fail: Some(fail_tx),
            });
            (id, state.hang_on_stop, fail_rx, state.fail_next_subscription.take())
        };
        let _ = self.inner.starts.fetch_add(1, Ordering::SeqCst);
        let _ = self.inner.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard {
            inner: Arc::clone(&self.inner),
            id,
        };

        Ok(Subscription::spawn(move |cancel, reporter| async move {
            let _guard = guard;
            if let Some(error) = early {
                reporter.report(error);
            } else {
                let mut fail_rx = fail_rx;
                tokio::select! {
                    () = cancel.cancelled() => {}
                    Ok(error) = &mut fail_rx => reporter.report(error),
                }
            }
            if hang {
                std::future::pending::<()>().await;
            }
        }))
    }
}
