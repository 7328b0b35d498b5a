//! Bounded hand-off from upstream producers to the broadcaster.

use std::sync::Arc;

use blockrelay_core::{Event, EventKind, classify};
use metrics::counter;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::metrics::{EVENTS_DROPPED_TOTAL, EVENTS_INGESTED_TOTAL};
use crate::source::RawEventHandler;

/// Producer side of the event queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. A full or closed queue drops the event.
    pub fn publish(&self, event: Event) -> Result<(), QueueError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!(kind = %event.kind(), "event queue full, dropping event");
                counter!(EVENTS_DROPPED_TOTAL, "reason" => "queue_full").increment(1);
                Err(QueueError::Full(event.kind()))
            }
            Err(TrySendError::Closed(event)) => {
                debug!(kind = %event.kind(), "event queue closed, dropping event");
                Err(QueueError::Closed)
            }
        }
    }

    /// Classify `raw` and enqueue the result.
    ///
    /// Records that fail classification are logged and counted, never
    /// forwarded.
    pub fn ingest(&self, raw: &Value) -> Result<EventKind, QueueError> {
        match classify(raw) {
            Ok(event) => {
                let kind = event.kind();
                counter!(EVENTS_INGESTED_TOTAL, "kind" => kind.as_str()).increment(1);
                self.publish(event)?;
                Ok(kind)
            }
            Err(e) => {
                warn!(error = %e, "dropping upstream record");
                counter!(EVENTS_DROPPED_TOTAL, "reason" => e.reason()).increment(1);
                Err(e.into())
            }
        }
    }

    /// Callback form of [`ingest`](Self::ingest) for upstream sources.
    pub fn handler(&self) -> RawEventHandler {
        let queue = self.clone();
        Arc::new(move |raw| {
            let _ = queue.ingest(&raw);
        })
    }
}
