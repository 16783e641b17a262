use std::net::SocketAddr;

use crate::protocol::Request;

// ── Requests ─────────────────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const QUERIES_TOTAL: &str = "slotguard_queries_total";

/// Histogram: request latency in seconds. Labels: op.
pub const QUERY_DURATION_SECONDS: &str = "slotguard_query_duration_seconds";

/// Counter: booking attempts by outcome (committed, timeout, or error kind).
pub const BOOKINGS_TOTAL: &str = "slotguard_bookings_total";

// ── Resources ────────────────────────────────────────────

/// Gauge: clients currently connected.
pub const CONNECTIONS_ACTIVE: &str = "slotguard_connections_active";

/// Counter: clients admitted since start.
pub const CONNECTIONS_TOTAL: &str = "slotguard_connections_total";

/// Counter: clients turned away at `max_connections`.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotguard_connections_rejected_total";

/// Gauge: per-(staff, date) booking locks currently allocated.
pub const DAY_LOCKS_ACTIVE: &str = "slotguard_day_locks_active";

/// Histogram: seconds spent writing and fsyncing one ledger batch.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotguard_wal_flush_duration_seconds";

/// Histogram: ledger records per fsync.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotguard_wal_flush_batch_size";

/// Serve `/metrics` for Prometheus on `port`, if one is configured.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a request to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::Availability { .. } => "availability",
        Request::Book { .. } => "book",
        Request::SetStatus { .. } => "set_status",
        Request::Cancel { .. } => "cancel",
    }
}
