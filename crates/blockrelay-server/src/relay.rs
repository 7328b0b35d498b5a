//! Loop from the classified event queue to every connected client.

use std::sync::Arc;

use blockrelay_core::Event;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::EVENTS_BROADCAST_TOTAL;
use crate::websocket::registry::ClientRegistry;

/// Spawn the relay task. It exits on `cancel` or when every queue sender is
/// gone.
pub fn spawn_relay(
    mut rx: mpsc::Receiver<Event>,
    clients: Arc<ClientRegistry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("event relay started");
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("event queue closed");
                        break;
                    }
                },
            };
            let _ = clients.broadcast_event(&event).await;
            counter!(EVENTS_BROADCAST_TOTAL, "kind" => event.kind().as_str()).increment(1);
        }
        info!("event relay stopped");
    })
}
