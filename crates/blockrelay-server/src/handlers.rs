//! HTTP API route handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use metrics::counter;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::errors::ApiError;
use crate::health::{self, HealthResponse};
use crate::metrics::API_REQUESTS_TOTAL;
use crate::server::AppState;
use crate::supervisor::SupervisorStatus;

/// `GET /api/status` body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Session configuration and state.
    #[serde(flatten)]
    pub supervisor: SupervisorStatus,
    /// Connected clients.
    pub clients: usize,
}

fn observe<T>(route: &'static str, result: Result<T, ApiError>) -> Result<T, ApiError> {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    counter!(API_REQUESTS_TOTAL, "route" => route, "status" => status.as_u16().to_string())
        .increment(1);
    result
}

/// Body must be a JSON string.
fn parse_address(body: &[u8]) -> Result<String, ApiError> {
    serde_json::from_slice::<String>(body)
        .map_err(|e| ApiError::BadRequest(format!("expected a JSON string: {e}")))
}

/// Body is either a JSON array of strings or one comma-separated string.
fn parse_event_types(body: &[u8]) -> Result<Vec<String>, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;
    match value {
        Value::String(list) => Ok(list.split(',').map(str::to_owned).collect()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(ApiError::BadRequest(format!(
                    "event types must be strings, got {other}"
                ))),
            })
            .collect(),
        _ => Err(ApiError::BadRequest(
            "expected an array of strings or a comma-separated string".into(),
        )),
    }
}

/// `POST /api/address`
pub async fn post_address(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let result: Result<_, ApiError> = async {
        let address = parse_address(&body)?;
        let generation = state.supervisor.update_address(&address).await?;
        let address = state.supervisor.config().address;
        info!(%address, generation, "address changed via api");
        Ok(Json(json!({ "address": address, "generation": generation })))
    }
    .await;
    observe("address", result)
}

/// `GET /api/address`
pub async fn get_address(State(state): State<AppState>) -> Json<String> {
    Json(state.supervisor.config().address)
}

/// `POST /api/event-types`
pub async fn post_event_types(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let result: Result<_, ApiError> = async {
        let types = parse_event_types(&body)?;
        let generation = state.supervisor.update_event_types(types).await?;
        let event_types: Vec<String> = state.supervisor.config().event_types.into_iter().collect();
        Ok(Json(json!({ "eventTypes": event_types, "generation": generation })))
    }
    .await;
    observe("event_types", result)
}

/// `GET /api/status`
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        supervisor: state.supervisor.status(),
        clients: state.clients.connection_count().await,
    })
}

/// `POST /webhook`: classify a pushed record and queue it for broadcast.
///
/// Answers 503 when the event could not be queued.
pub async fn post_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let result = serde_json::from_slice::<Value>(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
        .and_then(|raw| state.queue.ingest(&raw).map_err(ApiError::from))
        .map(|kind| Json(json!({ "accepted": kind.as_str() })));
    observe("webhook", result)
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.clients.connection_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        state.supervisor.state(),
    ))
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => ApiError::NotFound("metrics recorder not installed".into()).into_response(),
    }
}
