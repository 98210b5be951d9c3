//! Server metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(name = "requests_received", description = "Total requests received")]
pub static REQUESTS_RECEIVED: Counter = Counter::new();

#[metric(name = "responses_sent", description = "Total responses submitted")]
pub static RESPONSES_SENT: Counter = Counter::new();

#[metric(
    name = "streams_reset",
    description = "Streams reset by the server (timeouts and errors)"
)]
pub static STREAMS_RESET: Counter = Counter::new();

#[metric(name = "push_promises_sent", description = "PUSH_PROMISE frames sent")]
pub static PUSH_PROMISES_SENT: Counter = Counter::new();

#[metric(
    name = "settings_timeouts",
    description = "Sessions terminated for missing SETTINGS acknowledgement"
)]
pub static SETTINGS_TIMEOUTS: Counter = Counter::new();
