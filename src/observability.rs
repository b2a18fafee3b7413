use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created (confirmed or pending). Labels: status.
pub const BOOKINGS_CREATED_TOTAL: &str = "timeshare_bookings_created_total";

/// Counter: pending bookings driven to confirmed.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "timeshare_bookings_confirmed_total";

/// Counter: bookings cancelled (user, admin override, or reaper).
pub const BOOKINGS_CANCELLED_TOTAL: &str = "timeshare_bookings_cancelled_total";

/// Counter: create/reschedule attempts rejected with Conflict.
pub const BOOKING_CONFLICTS_TOTAL: &str = "timeshare_booking_conflicts_total";

/// Counter: requests rejected by the authorization evaluator.
pub const AUTHZ_DENIED_TOTAL: &str = "timeshare_authz_denied_total";

/// Histogram: service operation latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "timeshare_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active orgs (loaded engines).
pub const ORGS_ACTIVE: &str = "timeshare_orgs_active";

/// Counter: expired pending bookings cancelled by the reaper.
pub const PENDING_REAPED_TOTAL: &str = "timeshare_pending_reaped_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "timeshare_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "timeshare_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
