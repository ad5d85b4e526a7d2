//! Metric names and recording helpers.
//!
//! Helpers wrap the [`metrics`](https://docs.rs/metrics) facade and compile to
//! no-ops when the `metrics` feature is disabled. Nothing is exported unless
//! the embedding application installs a recorder.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open server connections.
pub const CONNECTIONS_ACTIVE: &str = "httpwire_connections_active";
/// Name of the counter tracking decoded and encoded messages.
pub const MESSAGES_TOTAL: &str = "httpwire_messages_total";
/// Name of the counter tracking errors, labelled by kind.
pub const ERRORS_TOTAL: &str = "httpwire_errors_total";
/// Name of the counter tracking requests refused because the work queue was
/// full.
pub const DISPATCH_REJECTED: &str = "httpwire_dispatch_rejected_total";

/// Direction of message flow relative to this process.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Messages decoded from a peer.
    Inbound,
    /// Messages written to a peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the open connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the open connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message in the given direction.
pub fn inc_messages(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an error of the given kind.
pub fn inc_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a request refused with `503`.
pub fn inc_dispatch_rejected() {
    #[cfg(feature = "metrics")]
    counter!(DISPATCH_REJECTED).increment(1);
}
