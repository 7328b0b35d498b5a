//! Upstream source contract.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use blockrelay_core::SessionConfig;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::UpstreamError;

/// Callback invoked for every raw record the source produces.
pub type RawEventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A source of raw chain-sync records.
///
/// `start` establishes a subscription for `config` and returns once the
/// producer is running. Setup failures are returned as
/// [`UpstreamError::StartFailed`]; failures after that point go through the
/// subscription's [`ErrorReporter`].
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Open a subscription for `config` that feeds `handler`.
    async fn start(
        &self,
        config: &SessionConfig,
        handler: RawEventHandler,
    ) -> Result<Subscription, UpstreamError>;
}

/// Single-shot terminal error report for one subscription.
#[derive(Debug)]
pub struct ErrorReporter {
    tx: oneshot::Sender<UpstreamError>,
}

impl ErrorReporter {
    /// Report the error that ended the producer.
    pub fn report(self, error: UpstreamError) {
        let _ = self.tx.send(error);
    }
}

/// A running producer.
///
/// Dropping a `Subscription` does not stop the producer; hand it to an
/// [`UpstreamSession`](crate::UpstreamSession), which owns its lifecycle.
#[derive(Debug)]
pub struct Subscription {
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<()>,
    pub(crate) errors: oneshot::Receiver<UpstreamError>,
}

impl Subscription {
    /// Spawn `producer` with a fresh cancel token and error reporter.
    ///
    /// The producer should return promptly once the token is cancelled.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(CancellationToken, ErrorReporter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (tx, errors) = oneshot::channel();
        let task = tokio::spawn(producer(cancel.clone(), ErrorReporter { tx }));
        Self {
            cancel,
            task,
            errors,
        }
    }

    /// Token that stops this producer when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn reporter_delivers_one_error() {
        let mut sub = Subscription::spawn(|_cancel, reporter| async move {
            reporter.report(UpstreamError::Terminated("boom".into()));
        });
        let err = (&mut sub.errors).await.unwrap();
        assert!(matches!(err, UpstreamError::Terminated(ref m) if m == "boom"));
        sub.task.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_reporter_closes_channel() {
        let sub = Subscription::spawn(|_cancel, reporter| async move {
            drop(reporter);
        });
        assert!(sub.errors.await.is_err());
    }

    #[tokio::test]
    async fn cancel_token_stops_producer() {
        let sub = Subscription::spawn(|cancel, _reporter| async move {
            cancel.cancelled().await;
        });
        sub.cancel_token().cancel();
        tokio::time::timeout(Duration::from_secs(1), sub.task)
            .await
            .expect("producer should exit")
            .unwrap();
    }
}
