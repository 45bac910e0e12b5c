//! Instrumentation for the request path.
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! binary installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "parley_requests_total";
    pub const REQUEST_FAILURES_TOTAL: &str = "parley_request_failures_total";
    pub const REQUEST_LATENCY_SECONDS: &str = "parley_request_latency_seconds";
    pub const FANOUT_PUBLISHES_TOTAL: &str = "parley_fanout_publishes_total";
    pub const FANOUT_FAILURES_TOTAL: &str = "parley_fanout_failures_total";
    pub const USERS_ACTIVE: &str = "parley_users_active";
    pub const CHANNELS_ACTIVE: &str = "parley_channels_active";
}

/// Record a handled request.
pub fn record_request(command: &str, seconds: f64) {
    counter!(names::REQUESTS_TOTAL, "command" => command.to_string()).increment(1);
    histogram!(names::REQUEST_LATENCY_SECONDS).record(seconds);
}

/// Record a request answered with `status=false`.
pub fn record_failure(kind: &str) {
    counter!(names::REQUEST_FAILURES_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record the outcome of a channel publish.
pub fn record_publish(ok: bool) {
    if ok {
        counter!(names::FANOUT_PUBLISHES_TOTAL).increment(1);
    } else {
        counter!(names::FANOUT_FAILURES_TOTAL).increment(1);
    }
}

/// Update the store gauges.
pub fn set_store_size(users: usize, channels: usize) {
    gauge!(names::USERS_ACTIVE).set(users as f64);
    gauge!(names::CHANNELS_ACTIVE).set(channels as f64);
}
