//! Relay background tasks and the token that stops them.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Drain bound used when the caller gives none.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-running tasks of one relay, all watching one token.
#[derive(Default)]
pub struct Background {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Background {
    /// Empty set with a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token tracked tasks stop on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Keep `handle` so [`drain`](Self::drain) waits for it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Whether a drain has started.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and wait up to `timeout` for every tracked task.
    ///
    /// Tasks still running after that are aborted. Returns how many.
    pub async fn drain(&self, timeout: Duration) -> usize {
        self.token.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();
        debug!(tasks = handles.len(), "draining background tasks");

        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok()
        {
            return 0;
        }
        let stragglers = aborts.iter().filter(|h| !h.is_finished()).count();
        warn!(stragglers, ?timeout, "background tasks did not stop in time, aborting");
        for handle in aborts {
            handle.abort();
        }
        stragglers
    }
}
