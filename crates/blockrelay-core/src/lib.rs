//! # blockrelay-core
//!
//! Shared types for the relay:
//!
//! - [`events::Event`]: strongly typed chain-sync events (block, rollback, transaction)
//! - [`classify`]: decoding of loosely typed upstream records into [`events::Event`]
//! - [`config::SessionConfig`]: the upstream subscription parameters
//! - [`errors`]: classification and configuration errors

#![deny(unsafe_code)]

pub mod classify;
pub mod config;
pub mod errors;
pub mod events;

pub use classify::{classify, normalize_timestamp};
pub use config::SessionConfig;
pub use errors::{ClassifyError, ConfigError};
pub use events::{Event, EventKind, REFRESH_NOTICE};
