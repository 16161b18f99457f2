use std::net::SocketAddr;

use crate::engine::SchedulerError;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "meetslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "meetslot_query_duration_seconds";

/// Counter: booking requests by result. Labels: outcome.
pub const BOOKING_REQUESTS_TOTAL: &str = "meetslot_booking_requests_total";

/// Counter: accepted/declined decisions. Labels: status.
pub const BOOKING_STATUS_CHANGES_TOTAL: &str = "meetslot_booking_status_changes_total";

/// Counter: notifier hook calls that returned an error. Labels: hook.
pub const NOTIFY_FAILURES_TOTAL: &str = "meetslot_notify_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "meetslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "meetslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "meetslot_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "meetslot_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "meetslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "meetslot_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "meetslot_wal_compactions_total";

// ── Sync loop ───────────────────────────────────────────────────

/// Counter: successful snapshot refreshes.
pub const SYNC_REFRESHES_TOTAL: &str = "meetslot_sync_refreshes_total";

/// Counter: refreshes that failed and left the previous view in place.
pub const SYNC_FAILURES_TOTAL: &str = "meetslot_sync_failures_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertAvailability { .. } => "insert_availability",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertDecision { .. } => "insert_decision",
        Command::SelectAvailabilities { .. } => "select_availabilities",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectFreeSegments { .. } => "select_free_segments",
        Command::SelectCalendar => "select_calendar",
    }
}

/// Short label for a failed operation's outcome.
pub fn error_label(err: &SchedulerError) -> &'static str {
    match err {
        SchedulerError::InvalidWindow { .. } => "invalid_window",
        SchedulerError::NotFound(_) => "not_found",
        SchedulerError::AlreadyExists(_) => "already_exists",
        SchedulerError::SlotUnavailable { .. } => "slot_unavailable",
        SchedulerError::MissingStudent => "missing_student",
        SchedulerError::InvalidTransition { .. } => "invalid_transition",
        SchedulerError::NotPermitted(_) => "not_permitted",
        SchedulerError::LimitExceeded(_) => "limit_exceeded",
        SchedulerError::StorageError(_) => "storage_error",
    }
}
