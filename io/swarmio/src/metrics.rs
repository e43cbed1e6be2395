//! Engine metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total inbound connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_dropped",
    description = "Accepted connections dropped at the admission cap"
)]
pub static CONNECTIONS_DROPPED: Counter = Counter::new();

#[metric(
    name = "connections_released",
    description = "Slots returned to the freelist"
)]
pub static CONNECTIONS_RELEASED: Counter = Counter::new();

#[metric(
    name = "connections_open",
    description = "Currently admitted connections"
)]
pub static CONNECTIONS_OPEN: Gauge = Gauge::new();

#[metric(name = "oob_bytes", description = "Out-of-band bytes delivered")]
pub static OOB_BYTES: Counter = Counter::new();
