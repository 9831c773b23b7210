use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotline_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotline_query_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (committed or an error kind).
pub const RESERVATIONS_TOTAL: &str = "slotline_reservations_total";

/// Counter: reservations that gave up waiting for the service lock.
pub const RESERVE_LOCK_TIMEOUTS_TOTAL: &str = "slotline_reserve_lock_timeouts_total";

// ── Notifications ───────────────────────────────────────────────

/// Counter: bookings handed to the dispatcher queue.
pub const NOTIFY_ENQUEUED_TOTAL: &str = "slotline_notify_enqueued_total";

/// Counter: bookings not queued for immediate delivery. Labels: reason.
/// The sweep picks these up later.
pub const NOTIFY_DROPPED_TOTAL: &str = "slotline_notify_dropped_total";

/// Counter: delivery attempts. Labels: outcome (sent, failed).
pub const NOTIFY_DELIVERIES_TOTAL: &str = "slotline_notify_deliveries_total";

/// Histogram: bookings picked up per sweep run.
pub const SWEEP_BATCH_SIZE: &str = "slotline_sweep_batch_size";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotline_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotline_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotline_connections_rejected_total";

/// Counter: startup and resolution auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "slotline_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotline_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
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
        Command::InsertOwner { .. } => "insert_owner",
        Command::InsertBusiness { .. } => "insert_business",
        Command::InsertBusinessHours { .. } => "insert_business_hours",
        Command::InsertService { .. } => "insert_service",
        Command::InsertServiceAvailability { .. } => "insert_service_availability",
        Command::DeleteServiceAvailability { .. } => "delete_service_availability",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertBookingStatus { .. } => "insert_booking_status",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectServices => "select_services",
        Command::SelectServiceAvailability { .. } => "select_service_availability",
        Command::SelectBusinessInfo => "select_business_info",
        Command::SelectBusinessHours => "select_business_hours",
        Command::SelectBooking { .. } => "select_booking",
        Command::SweepNotifications => "sweep_notifications",
    }
}
