//! # blockrelay-upstream
//!
//! Where events come from and how a subscription to the source is run.
//!
//! - [`source::UpstreamSource`]: pluggable source of raw records
//! - [`source::Subscription`]: one running producer with its cancel token and
//!   single-shot error channel
//! - [`session::UpstreamSession`]: lifecycle state machine around one
//!   subscription, with bounded stop and a failure watcher
//! - [`queue::EventQueue`]: classify raw records and hand them to the broadcaster
//! - [`process::CommandSource`]: the `snek` chain-sync process
//! - [`mock::MockSource`]: scriptable in-process source for tests

#![deny(unsafe_code)]

pub mod error;
pub mod metrics;
pub mod mock;
pub mod process;
pub mod queue;
pub mod session;
pub mod source;

pub use error::{QueueError, UpstreamError};
pub use mock::MockSource;
pub use process::CommandSource;
pub use queue::EventQueue;
pub use session::{
    SessionFailure, SessionOptions, SessionState, StateHandle, StopOutcome, UpstreamSession,
};
pub use source::{ErrorReporter, RawEventHandler, Subscription, UpstreamSource};
