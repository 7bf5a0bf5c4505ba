pub mod admin;
pub mod appointments;
pub mod availability;
pub mod health;
pub mod payment;
pub mod schedule;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;

use crate::{
    clock::{parse_date, parse_time_of_day},
    error::BookingError,
    AppState,
};

pub fn router(state: Arc<AppState>) -> Router {
    // Health checks + payment webhooks
    let system_routes = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/payments/webhook", post(payment::payment_webhook));

    // Client-facing booking flow
    let public_routes = Router::new()
        .route(
            "/api/barbers/{barber_id}/free-slots",
            get(availability::free_slots),
        )
        .route("/api/appointments", post(appointments::reserve));

    // Front desk
    let staff_routes = Router::new()
        .route("/api/staff/appointments", post(appointments::staff_booking))
        .route(
            "/api/staff/appointments/{id}/cancel",
            post(appointments::cancel),
        )
        .route(
            "/api/staff/barbers/{barber_id}/weekly-schedule",
            post(schedule::add_weekly_window),
        )
        .route(
            "/api/staff/barbers/{barber_id}/exceptional-days",
            post(schedule::add_exceptional_window),
        )
        .route(
            "/api/staff/barbers/{barber_id}/manual-blocks",
            post(schedule::add_manual_block),
        );

    let admin_routes = Router::new()
        .route("/api/admin/reaper/run", post(admin::run_reaper))
        .route("/api/admin/reaper/stats", get(admin::reaper_stats));

    Router::new()
        .merge(system_routes)
        .merge(public_routes)
        .merge(staff_routes)
        .merge(admin_routes)
        .with_state(state)
}

pub(crate) fn parse_date_field(raw: &str, field: &str) -> Result<NaiveDate, BookingError> {
    parse_date(raw.trim())
        .ok_or_else(|| BookingError::Validation(format!("{field} must be YYYY-MM-DD, got {raw:?}")))
}

pub(crate) fn parse_time_field(raw: &str, field: &str) -> Result<NaiveTime, BookingError> {
    parse_time_of_day(raw.trim())
        .ok_or_else(|| BookingError::Validation(format!("{field} must be HH:MM, got {raw:?}")))
}
