//! Prometheus metrics for the notification service.
//!
//! Covers connection lifecycle, notification delivery by addressing mode,
//! heartbeat probing, and message-bus publishing.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "beacon";

lazy_static! {
    /// Number of currently open WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of currently open WebSocket connections"
    ).unwrap();

    /// Total WebSocket connections opened
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Number of unique authenticated users with live connections
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique authenticated users with live connections"
    ).unwrap();

    /// Notifications routed, by addressing mode
    pub static ref NOTIFICATIONS_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_sent_total", METRIC_PREFIX),
        "Notifications routed for delivery",
        &["mode"]
    ).unwrap();

    /// Per-connection delivery successes
    pub static ref NOTIFICATIONS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_delivered_total", METRIC_PREFIX),
        "Per-connection notification delivery successes"
    ).unwrap();

    /// Per-connection delivery failures
    pub static ref NOTIFICATIONS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_failed_total", METRIC_PREFIX),
        "Per-connection notification delivery failures"
    ).unwrap();

    /// Liveness probes sent to idle connections
    pub static ref HEARTBEAT_PINGS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_pings_total", METRIC_PREFIX),
        "Liveness probes sent to idle connections"
    ).unwrap();

    /// Connections dropped after an unanswered probe
    pub static ref HEARTBEAT_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_expired_total", METRIC_PREFIX),
        "Connections dropped after an unanswered liveness probe"
    ).unwrap();

    /// Messages published through the bus
    pub static ref BUS_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bus_published_total", METRIC_PREFIX),
        "Messages published through the message bus"
    ).unwrap();

    /// Bus handler invocation failures
    pub static ref BUS_HANDLER_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bus_handler_errors_total", METRIC_PREFIX),
        "Message bus handler invocation failures"
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_prefix() {
        CONNECTIONS_OPENED_TOTAL.inc();
        let text = encode().unwrap();
        assert!(text.contains("beacon_connections_opened_total"));
    }
}
