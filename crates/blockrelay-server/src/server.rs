//! `RelayServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use blockrelay_core::{Event, SessionConfig};
use blockrelay_upstream::{EventQueue, UpstreamSource};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::handlers;
use crate::relay::spawn_relay;
use crate::shutdown::{Background, DEFAULT_DRAIN_TIMEOUT};
use crate::supervisor::{SessionSupervisor, SupervisorOptions};
use crate::websocket::endpoint::{EndpointOptions, ws_handler};
use crate::websocket::registry::ClientRegistry;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connected clients.
    pub clients: Arc<ClientRegistry>,
    /// Owner of the upstream session.
    pub supervisor: Arc<SessionSupervisor>,
    /// Producer side of the broadcast queue, used by the webhook.
    pub queue: EventQueue,
    /// Per-connection `WebSocket` settings.
    pub endpoint: EndpointOptions,
    /// When the server started.
    pub start_time: Instant,
    /// `None` when no Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    clients: Arc<ClientRegistry>,
    supervisor: Arc<SessionSupervisor>,
    queue: EventQueue,
    events: Mutex<Option<mpsc::Receiver<Event>>>,
    background: Background,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Wire the registry, queue and supervisor. Nothing runs until
    /// [`listen`](Self::listen), and the upstream session only starts when
    /// the supervisor is told to.
    pub fn new(
        config: ServerConfig,
        source: Arc<dyn UpstreamSource>,
        session: SessionConfig,
        options: SupervisorOptions,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let clients = Arc::new(ClientRegistry::new());
        let (queue, events) = EventQueue::bounded(config.event_queue_capacity);
        let supervisor = Arc::new(SessionSupervisor::new(
            source,
            queue.handler(),
            Arc::clone(&clients),
            session,
            options,
        ));
        Self {
            config,
            clients,
            supervisor,
            queue,
            events: Mutex::new(Some(events)),
            background: Background::new(),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            clients: Arc::clone(&self.clients),
            supervisor: Arc::clone(&self.supervisor),
            queue: self.queue.clone(),
            endpoint: EndpointOptions {
                client_queue_capacity: self.config.client_queue_capacity,
                ping_interval: self.config.ping_interval(),
                pass_through: self.config.pass_through,
            },
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(handlers::health_handler))
            .route("/metrics", get(handlers::metrics_handler))
            .route(
                "/api/address",
                get(handlers::get_address).post(handlers::post_address),
            )
            .route("/api/event-types", post(handlers::post_event_types))
            .route("/api/status", get(handlers::get_status))
            .route("/webhook", post(handlers::post_webhook))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Spawn the relay and recovery tasks, bind, and serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let events = self.events.lock().take();
        if let Some(events) = events {
            self.background.track(spawn_relay(
                events,
                Arc::clone(&self.clients),
                self.background.token(),
            ));
        }
        if let Some(recovery) = self.supervisor.spawn_recovery(self.background.token()) {
            self.background.track(recovery);
        }

        let router = self.router();
        let token = self.background.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });
        info!(%local_addr, "relay server listening");
        Ok((local_addr, handle))
    }

    /// Stop the upstream session, close every client and wait up to
    /// `timeout` for background tasks. Returns `false` if any had to be
    /// aborted.
    pub async fn stop(&self, timeout: Option<Duration>) -> bool {
        // Stop accepting connections before closing the existing ones.
        self.background.token().cancel();
        let outcome = self.supervisor.stop().await;
        let closed = self.clients.close_all().await;
        info!(?outcome, clients = closed, "relay shutting down");
        self.background
            .drain(timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT))
            .await
            == 0
    }

    /// Connected clients.
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Owner of the upstream session.
    pub fn supervisor(&self) -> &Arc<SessionSupervisor> {
        &self.supervisor
    }

    /// Producer side of the broadcast queue.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Whether [`stop`](Self::stop) has begun draining.
    pub fn is_stopping(&self) -> bool {
        self.background.is_stopping()
    }

    /// Listener and fan-out settings.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use blockrelay_upstream::{MockSource, SessionState};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn make_server(source: &MockSource, metrics: Option<PrometheusHandle>) -> RelayServer {
        RelayServer::new(
            ServerConfig::default(),
            Arc::new(source.clone()),
            SessionConfig::default(),
            SupervisorOptions {
                default_address: "10.1.1.1:3001".into(),
                stop_timeout: Duration::from_millis(200),
                ..SupervisorOptions::default()
            },
            metrics,
        )
    }

    async fn send(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let parsed = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, parsed)
    }

    #[tokio::test]
    async fn health_reports_session_state() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let (status, body) = send(server.router(), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["session_state"], "stopped");

        let _ = server.supervisor().start().await.unwrap();
        let (_, body) = send(server.router(), "GET", "/health", "").await;
        assert_eq!(body["session_state"], "running");
    }

    #[tokio::test]
    async fn post_address_restarts_session() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let _ = server.supervisor().start().await.unwrap();

        let (status, body) = send(server.router(), "POST", "/api/address", r#""node:7000""#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "node:7000");
        assert_eq!(body["generation"], 2);
        assert_eq!(source.start_count(), 2);

        let (status, body) = send(server.router(), "GET", "/api/address", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "node:7000");
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_address_request_still_restarts() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        source.set_hang_on_stop(true);
        let _ = server.supervisor().start().await.unwrap();
        source.set_hang_on_stop(false);

        let request = send(server.router(), "POST", "/api/address", r#""node-b:3001""#);
        assert!(tokio::time::timeout(Duration::from_millis(50), request).await.is_err());
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(server.supervisor().state(), SessionState::Running);
        assert_eq!(source.start_count(), 2);
        let (_, body) = send(server.router(), "GET", "/api/address", "").await;
        assert_eq!(body, "node-b:3001");
    }

    #[tokio::test]
    async fn post_empty_address_uses_default() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let (status, body) = send(server.router(), "POST", "/api/address", r#""""#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "10.1.1.1:3001");
        assert_eq!(source.start_count(), 1);
    }

    #[tokio::test]
    async fn post_address_rejects_non_string() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let (status, body) = send(server.router(), "POST", "/api/address", "node:7000").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert_eq!(source.start_count(), 0);
    }

    #[tokio::test]
    async fn post_address_start_failure_is_bad_gateway() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        source.fail_next_start("connection refused");
        let (status, body) = send(server.router(), "POST", "/api/address", r#""down:1""#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
        assert_eq!(server.supervisor().state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn post_event_types_accepts_both_shapes() {
        let source = MockSource::new();
        let server = make_server(&source, None);

        let (status, body) = send(
            server.router(),
            "POST",
            "/api/event-types",
            r#"["chainsync.rollback","chainsync.block"]"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["eventTypes"],
            serde_json::json!(["chainsync.block", "chainsync.rollback"])
        );

        let (status, body) = send(
            server.router(),
            "POST",
            "/api/event-types",
            r#""chainsync.transaction""#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["eventTypes"], serde_json::json!(["chainsync.transaction"]));
        assert_eq!(body["generation"], 2);
    }

    #[tokio::test]
    async fn post_empty_event_types_rejected() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let (status, _) = send(server.router(), "POST", "/api/event-types", "[]").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(server.router(), "POST", "/api/event-types", r#"" , ""#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(source.start_count(), 0);
        assert_eq!(server.supervisor().config(), SessionConfig::default());
    }

    #[tokio::test]
    async fn status_includes_clients() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let _ = server.supervisor().start().await.unwrap();
        let (status, body) = send(server.router(), "GET", "/api/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "running");
        assert_eq!(body["generation"], 1);
        assert_eq!(body["clients"], 0);
        assert_eq!(body["address"], "127.0.0.1:3001");
    }

    #[tokio::test]
    async fn webhook_classifies_records() {
        let source = MockSource::new();
        let server = make_server(&source, None);

        let (status, body) = send(
            server.router(),
            "POST",
            "/webhook",
            r#"{"kind":"chainsync.block","blockNumber":1,"blockHash":"a"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], "chainsync.block");

        let (status, _) = send(
            server.router(),
            "POST",
            "/webhook",
            r#"{"kind":"chainsync.block","blockNumber":"x","blockHash":"a"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(server.router(), "POST", "/webhook", r#"{"kind":"other"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(server.router(), "POST", "/webhook", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_full_queue_is_unavailable() {
        let source = MockSource::new();
        let server = RelayServer::new(
            ServerConfig {
                event_queue_capacity: 1,
                ..ServerConfig::default()
            },
            Arc::new(source.clone()),
            SessionConfig::default(),
            SupervisorOptions::default(),
            None,
        );
        let record = r#"{"kind":"chainsync.block","blockNumber":1,"blockHash":"a"}"#;

        // Nothing drains the queue until `listen`.
        let (status, _) = send(server.router(), "POST", "/webhook", record).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(server.router(), "POST", "/webhook", record).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("queue full"));
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let (status, _) = send(server.router(), "GET", "/api/event-types", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        let (status, _) = send(server.router(), "DELETE", "/api/address", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let (status, _) = send(server.router(), "GET", "/ws", "").await;
        assert!(status.is_client_error());
        assert_eq!(server.clients().connection_count().await, 0);
    }

    #[tokio::test]
    async fn metrics_endpoint() {
        let source = MockSource::new();
        let without = make_server(&source, None);
        let (status, _) = send(without.router(), "GET", "/metrics", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let with = make_server(&source, Some(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = with.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let (status, _) = send(server.router(), "GET", "/nonexistent", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_shuts_everything_down() {
        let source = MockSource::new();
        let server = make_server(&source, None);
        let _ = server.supervisor().start().await.unwrap();
        let (_addr, handle) = server.listen().await.unwrap();

        assert!(server.stop(Some(Duration::from_secs(2))).await);
        assert!(server.is_stopping());
        assert_eq!(source.live_count(), 0);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
