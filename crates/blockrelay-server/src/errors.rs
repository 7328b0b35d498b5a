//! Supervisor and HTTP API errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use blockrelay_core::ConfigError;
use blockrelay_upstream::{QueueError, UpstreamError};
use thiserror::Error;

/// Failures of supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start` was called while a session is held.
    #[error("upstream session already running")]
    AlreadyRunning,
    /// The requested configuration was rejected; nothing changed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// The upstream session could not be started.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// The lifecycle task panicked or was aborted by runtime shutdown.
    #[error("supervisor task interrupted: {0}")]
    Interrupted(String),
}

/// Error returned by HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body was unusable.
    #[error("{0}")]
    BadRequest(String),
    /// A webhook record was rejected or could not be queued.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// A lifecycle operation failed.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    /// The resource is not available.
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Queue(QueueError::Rejected(_)) => StatusCode::BAD_REQUEST,
            Self::Queue(QueueError::Full(_) | QueueError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Supervisor(SupervisorError::AlreadyRunning) => StatusCode::CONFLICT,
            Self::Supervisor(SupervisorError::InvalidConfig(_)) => StatusCode::BAD_REQUEST,
            Self::Supervisor(SupervisorError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            Self::Supervisor(SupervisorError::Interrupted(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use blockrelay_core::{ClassifyError, EventKind};

    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(QueueError::from(ClassifyError::Unrecognized("missing".into()))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(QueueError::Full(EventKind::Block)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(SupervisorError::Interrupted("panicked".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(SupervisorError::AlreadyRunning).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SupervisorError::from(ConfigError::EmptyEventTypes)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SupervisorError::from(UpstreamError::StartFailed("x".into()))).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::NotFound("none".into()).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn supervisor_error_display() {
        assert_eq!(
            SupervisorError::AlreadyRunning.to_string(),
            "upstream session already running"
        );
        assert_eq!(
            SupervisorError::from(UpstreamError::StartFailed("refused".into())).to_string(),
            "failed to start upstream: refused"
        );
    }

    #[tokio::test]
    async fn renders_json_body() {
        let resp = ApiError::BadRequest("expected a JSON string".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "expected a JSON string");
    }
}
