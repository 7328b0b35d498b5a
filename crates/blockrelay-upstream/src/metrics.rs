//! Metric names recorded by this crate.

/// Counter: raw records accepted into the queue, labeled by `kind`.
pub const EVENTS_INGESTED_TOTAL: &str = "events_ingested_total";
/// Counter: records dropped before broadcast, labeled by `reason`.
pub const EVENTS_DROPPED_TOTAL: &str = "events_dropped_total";
/// Counter: sessions started, labeled by `source`.
pub const UPSTREAM_STARTS_TOTAL: &str = "upstream_starts_total";
/// Counter: sessions that failed to start, labeled by `source`.
pub const UPSTREAM_START_FAILURES_TOTAL: &str = "upstream_start_failures_total";
/// Counter: running sessions that reported a terminal error.
pub const UPSTREAM_FAILURES_TOTAL: &str = "upstream_failures_total";
/// Counter: stops that hit the timeout and aborted the producer.
pub const UPSTREAM_FORCED_STOPS_TOTAL: &str = "upstream_forced_stops_total";
