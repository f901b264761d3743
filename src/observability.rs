use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::booking::BookingError;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "washbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "washbook_query_duration_seconds";

/// Counter: booking attempts turned away. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "washbook_bookings_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "washbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "washbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "washbook_connections_rejected_total";

/// Gauge: number of loaded laundries.
pub const TENANTS_ACTIVE: &str = "washbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "washbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "washbook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertHousehold { .. } => "insert_household",
        Command::UpdateProfile { .. } => "update_profile",
        Command::InsertBooking { .. } => "insert_booking",
        Command::StartWash { .. } => "start_wash",
        Command::CompleteWash { .. } => "complete_wash",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectHouseholds => "select_households",
        Command::SelectColors => "select_colors",
        Command::SelectDashboard => "select_dashboard",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSchedule { .. } => "select_schedule",
    }
}

/// Short label for why a booking was turned away.
pub fn rejection_label(reason: &BookingError) -> &'static str {
    match reason {
        BookingError::InThePast => "in_the_past",
        BookingError::SlotUnavailable(_) => "slot_unavailable",
        BookingError::BeyondHorizon(_) => "beyond_horizon",
        BookingError::OutsideViewWindow => "outside_view_window",
        BookingError::NotStartable => "not_startable",
        BookingError::NotRunning => "not_running",
        BookingError::NotCancellable => "not_cancellable",
    }
}
