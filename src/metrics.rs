//! Metric helpers for the dispatch core.
//!
//! Thin wrappers over the [`metrics`](https://docs.rs/metrics) facade.
//! Every helper compiles to a no-op unless the `metrics` cargo feature is
//! enabled, so instrumented call sites cost nothing by default.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Gauge tracking connections currently under dispatch.
pub const CONNECTIONS_ACTIVE: &str = "portico_connections_active";
/// Counter of requests accepted into the dispatch pipeline.
pub const REQUESTS_DISPATCHED: &str = "portico_requests_dispatched_total";
/// Counter of responses scheduled onto the wire.
pub const RESPONSES_WRITTEN: &str = "portico_responses_written_total";
/// Counter of invocations that hit their deadline.
pub const REQUEST_TIMEOUTS: &str = "portico_request_timeouts_total";
/// Counter of requests answered with a generated error response.
pub const DISPATCH_ERRORS: &str = "portico_dispatch_errors_total";

#[cfg(feature = "metrics")]
pub(crate) fn inc_connections() { gauge!(CONNECTIONS_ACTIVE).increment(1.0); }

#[cfg(not(feature = "metrics"))]
pub(crate) fn inc_connections() {}

#[cfg(feature = "metrics")]
pub(crate) fn dec_connections() { gauge!(CONNECTIONS_ACTIVE).decrement(1.0); }

#[cfg(not(feature = "metrics"))]
pub(crate) fn dec_connections() {}

#[cfg(feature = "metrics")]
pub(crate) fn inc_requests_dispatched() { counter!(REQUESTS_DISPATCHED).increment(1); }

#[cfg(not(feature = "metrics"))]
pub(crate) fn inc_requests_dispatched() {}

#[cfg(feature = "metrics")]
pub(crate) fn inc_responses_written() { counter!(RESPONSES_WRITTEN).increment(1); }

#[cfg(not(feature = "metrics"))]
pub(crate) fn inc_responses_written() {}

#[cfg(feature = "metrics")]
pub(crate) fn inc_request_timeouts() { counter!(REQUEST_TIMEOUTS).increment(1); }

#[cfg(not(feature = "metrics"))]
pub(crate) fn inc_request_timeouts() {}

#[cfg(feature = "metrics")]
pub(crate) fn inc_dispatch_errors() { counter!(DISPATCH_ERRORS).increment(1); }

#[cfg(not(feature = "metrics"))]
pub(crate) fn inc_dispatch_errors() {}
