//! Registry of connected clients and event fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use blockrelay_core::Event;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, SendOutcome};
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_EVICTIONS_TOTAL};

/// Lifetime drops after which a slow client is evicted.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Clients an enqueue was attempted for.
    pub attempted: usize,
    /// Frames enqueued.
    pub delivered: usize,
    /// Frames dropped on a full queue.
    pub dropped: usize,
    /// Clients removed during this broadcast.
    pub removed: usize,
}

/// Connected clients indexed by connection ID.
pub struct ClientRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    max_total_drops: u64,
}

impl ClientRegistry {
    /// Registry with the default eviction threshold.
    pub fn new() -> Self {
        Self::with_max_drops(MAX_TOTAL_DROPS)
    }

    /// Registry that evicts a client after `max_total_drops` dropped frames.
    pub fn with_max_drops(max_total_drops: u64) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_total_drops: max_total_drops.max(1),
        }
    }

    /// Add a connection. Returns `false` and keeps the existing entry when
    /// the ID is already registered.
    pub async fn register(&self, connection: Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write().await;
        if conns.contains_key(&connection.id) {
            return false;
        }
        let _ = conns.insert(connection.id.clone(), connection);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        true
    }

    /// Remove a connection and fire its close signal.
    ///
    /// Returns `true` only for the call that removed it.
    pub async fn unregister(&self, connection_id: &str) -> bool {
        let removed = self.connections.write().await.remove(connection_id);
        match removed {
            Some(conn) => {
                conn.close();
                gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
                true
            }
            None => false,
        }
    }

    /// Visit every client under the read lock. Clients for which `f`
    /// returns `false` are removed afterwards. Returns the number removed.
    pub async fn for_each<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&ClientConnection) -> bool,
    {
        let to_remove: Vec<String> = {
            let conns = self.connections.read().await;
            conns
                .values()
                .filter(|conn| !f(conn))
                .map(|conn| conn.id.clone())
                .collect()
        };
        if to_remove.is_empty() {
            return 0;
        }

        let mut conns = self.connections.write().await;
        let mut removed = 0;
        for id in to_remove {
            if let Some(conn) = conns.remove(&id) {
                conn.close();
                gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
                removed += 1;
            }
        }
        removed
    }

    /// Enqueue `frame` once per client.
    ///
    /// Closed queues are removed. A full queue drops the frame for that
    /// client, and a client that has dropped too many frames is evicted.
    pub async fn broadcast(&self, frame: Utf8Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let max_drops = self.max_total_drops;
        let removed = self
            .for_each(|conn| {
                report.attempted += 1;
                match conn.send(frame.clone()) {
                    SendOutcome::Queued => {
                        report.delivered += 1;
                        true
                    }
                    SendOutcome::Full => {
                        report.dropped += 1;
                        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                        if conn.drop_count() >= max_drops {
                            warn!(client_id = %conn.id, drops = conn.drop_count(), "evicting slow client");
                            counter!(WS_EVICTIONS_TOTAL).increment(1);
                            false
                        } else {
                            true
                        }
                    }
                    SendOutcome::Closed => {
                        debug!(client_id = %conn.id, "client queue closed, removing");
                        false
                    }
                }
            })
            .await;
        report.removed = removed;
        report
    }

    /// Serialize `event` once and broadcast the same bytes to all clients.
    pub async fn broadcast_event(&self, event: &Event) -> BroadcastReport {
        match serde_json::to_string(event) {
            Ok(json) => {
                let report = self.broadcast(json.into()).await;
                debug!(
                    kind = %event.kind(),
                    recipients = report.delivered,
                    dropped = report.dropped,
                    "broadcast event"
                );
                report
            }
            Err(e) => {
                warn!(kind = %event.kind(), error = %e, "failed to serialize event");
                BroadcastReport::default()
            }
        }
    }

    /// Broadcast a control notice such as `refresh`.
    pub async fn broadcast_text(&self, text: &str) -> BroadcastReport {
        let report = self.broadcast(text.into()).await;
        info!(notice = text, recipients = report.delivered, "broadcast notice");
        report
    }

    /// Remove and close every connection. Returns how many were open.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        for (_, conn) in &drained {
            conn.close();
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        }
        drained.len()
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether `connection_id` is registered.
    pub async fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
