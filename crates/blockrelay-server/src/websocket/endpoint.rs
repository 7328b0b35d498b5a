//! `GET /ws`: upgrade, register, and run one client until it goes away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use super::connection::ClientConnection;
use super::registry::ClientRegistry;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_UPGRADE_REJECTIONS_TOTAL,
};
use crate::server::AppState;

/// How long the endpoint waits for the writer to flush a close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-connection behaviour.
#[derive(Clone, Copy, Debug)]
pub struct EndpointOptions {
    /// Outbound frames buffered per client.
    pub client_queue_capacity: usize,
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Rebroadcast text frames from this client to every client.
    pub pass_through: bool,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            client_queue_capacity: 64,
            ping_interval: Duration::from_secs(30),
            pass_through: false,
        }
    }
}

/// Upgrade handler. A failed upgrade answers with the rejection's status and
/// never registers a client.
pub async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            let clients = Arc::clone(&state.clients);
            let options = state.endpoint;
            ws.on_upgrade(move |socket| run_client(socket, clients, options))
        }
        Err(rejection) => {
            warn!(status = %rejection.status(), reason = %rejection.body_text(), "websocket upgrade rejected");
            counter!(WS_UPGRADE_REJECTIONS_TOTAL).increment(1);
            rejection.into_response()
        }
    }
}

/// Drive one upgraded socket from registration to cleanup.
///
/// The writer owns the sink and forwards queued frames plus pings. The
/// reader watches for peer input and the close signal. Either side ending
/// fires the close signal, and the client is unregistered before the socket
/// is dropped.
pub async fn run_client(socket: WebSocket, clients: Arc<ClientRegistry>, options: EndpointOptions) {
    let client_id = ClientConnection::generate_id();
    let span = info_span!("ws_client", client_id = %client_id);
    serve_client(socket, client_id, clients, options)
        .instrument(span)
        .await;
}

async fn serve_client(
    socket: WebSocket,
    client_id: String,
    clients: Arc<ClientRegistry>,
    options: EndpointOptions,
) {
    let (tx, mut rx) = mpsc::channel::<Utf8Bytes>(options.client_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(client_id.clone(), tx));
    if !clients.register(Arc::clone(&connection)).await {
        warn!("duplicate client id, closing socket");
        return;
    }
    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!("client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let close = connection.close_token();
    let ping_interval = options.ping_interval;
    let mut writer = tokio::spawn(
        async move {
            let mut ping = tokio::time::interval(ping_interval);
            // The first tick completes immediately.
            let _ = ping.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = close.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                            debug!(error = %e, "write failed");
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        if let Err(e) = ws_tx.send(Message::Ping(Vec::new().into())).await {
                            debug!(error = %e, "ping failed");
                            break;
                        }
                    }
                }
            }
            close.cancel();
            let _ = ws_tx.close().await;
        }
        .in_current_span(),
    );

    loop {
        let msg = tokio::select! {
            () = connection.closed() => {
                debug!("connection closed by server");
                break;
            }
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                if options.pass_through {
                    let _ = clients.broadcast(text).await;
                } else {
                    debug!(len = text.len(), "ignoring client text frame");
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                debug!(error = %e, "read failed");
                break;
            }
            None => break,
        }
    }

    let _ = clients.unregister(&client_id).await;
    connection.close();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        dropped = connection.drop_count(),
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "client disconnected"
    );
}
