//! `WebSocket` client connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Result of enqueueing a frame for one client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame is in the client's queue.
    Queued,
    /// The client's queue is full; the frame was dropped.
    Full,
    /// The writer is gone.
    Closed,
}

/// A connected `WebSocket` client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    /// Send channel to the client's writer task.
    tx: mpsc::Sender<Utf8Bytes>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Frames dropped because the queue was full.
    dropped_messages: AtomicU64,
    /// Fired when the connection is removed from the registry.
    close: CancellationToken,
}

impl ClientConnection {
    /// Connection `id` feeding the writer behind `tx`.
    pub fn new(id: String, tx: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
            close: CancellationToken::new(),
        }
    }

    /// Fresh `client_<uuid>` identifier.
    pub fn generate_id() -> String {
        format!("client_{}", uuid::Uuid::now_v7())
    }

    /// Enqueue a frame without waiting.
    pub fn send(&self, frame: Utf8Bytes) -> SendOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Signal both halves of the connection to finish.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether the close signal has fired.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    pub(crate) fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("dropped", &self.drop_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
