//! # blockrelay-server
//!
//! Axum HTTP + `WebSocket` fan-out server.
//!
//! - `WebSocket` endpoint: per-client bounded queue, writer task with pings,
//!   idempotent unregister
//! - Client registry with slow-client eviction
//! - Relay loop from the event queue to every client
//! - Session supervisor: serialized restarts, `refresh` notices, optional
//!   automatic recovery
//! - HTTP API for reconfiguration, status, webhook ingest, health, metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod supervisor;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{ApiError, SupervisorError};
pub use server::{AppState, RelayServer};
pub use supervisor::{RestartPolicy, SessionSupervisor, SupervisorOptions, SupervisorStatus};
pub use websocket::endpoint::EndpointOptions;
pub use websocket::registry::{BroadcastReport, ClientRegistry};
