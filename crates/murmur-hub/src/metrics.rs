//! Routing metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed by
//! the host application. Without one every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

use crate::types::RouteKind;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("murmur-hub"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for envelopes routed by the hub.
pub fn envelopes_routed() -> Counter<u64> {
    meter()
        .u64_counter("murmur.envelopes.routed")
        .with_description("Total envelopes routed by the hub")
        .with_unit("envelope")
        .build()
}

/// Counter for deliveries that were dropped.
pub fn deliveries_dropped() -> Counter<u64> {
    meter()
        .u64_counter("murmur.deliveries.dropped")
        .with_description("Deliveries dropped (offline recipient, full queue, store failure)")
        .with_unit("delivery")
        .build()
}

/// Counter for heartbeats answered by client actors.
pub fn heartbeats() -> Counter<u64> {
    meter()
        .u64_counter("murmur.heartbeats")
        .with_description("Total heartbeats answered")
        .with_unit("heartbeat")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for registered sessions.
pub fn sessions_active() -> Gauge<i64> {
    meter()
        .i64_gauge("murmur.sessions.active")
        .with_description("Current number of registered sessions")
        .with_unit("session")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record an envelope entering the hub's route path.
pub fn record_route(kind: RouteKind) {
    envelopes_routed().add(1, &[KeyValue::new("route", kind.as_str())]);
}

/// Record a dropped delivery.
pub fn record_drop(reason: &'static str) {
    deliveries_dropped().add(1, &[KeyValue::new("reason", reason)]);
}

pub fn record_heartbeat() {
    heartbeats().add(1, &[]);
}

/// Record the current registered session count.
pub fn record_session_count(count: usize) {
    sessions_active().record(count as i64, &[]);
}
