use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::{parse_date_field, parse_time_field};
use crate::{
    error::BookingError,
    models::*,
    reservation::SlotRequest,
    AppState,
};

fn slot_request(
    branch_id: i64,
    barber_id: i64,
    service_id: i64,
    date: &str,
    time: &str,
    client: ClientInfo,
) -> Result<SlotRequest, BookingError> {
    Ok(SlotRequest {
        branch_id,
        barber_id,
        service_id,
        date: parse_date_field(date, "date")?,
        time: parse_time_field(time, "time")?,
        client,
    })
}

/// POST /api/appointments - hold a slot for online checkout
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ApiResponse<ReserveResponse>>, BookingError> {
    let request = slot_request(
        req.branch_id,
        req.barber_id,
        req.service_id,
        &req.date,
        &req.time,
        ClientInfo {
            name: req.client_name,
            phone: req.client_phone,
            age: req.client_age,
        },
    )?;

    let appointment = state.reservations.reserve(&request).await?;

    // A hold left without its checkout is cleaned up by the reaper.
    let payment = match &req.checkout {
        Some(checkout) => Some(
            state
                .reservations
                .record_checkout(appointment.id, checkout)
                .await?,
        ),
        None => None,
    };

    Ok(Json(ApiResponse::success(ReserveResponse { appointment, payment })))
}

/// POST /api/staff/appointments - walk-in or phone booking
pub async fn staff_booking(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StaffBookingRequest>,
) -> Result<Json<ApiResponse<Appointment>>, BookingError> {
    let request = slot_request(
        req.branch_id,
        req.barber_id,
        req.service_id,
        &req.date,
        &req.time,
        ClientInfo {
            name: req.client_name,
            phone: req.client_phone,
            age: req.client_age,
        },
    )?;

    let appointment = state
        .reservations
        .block_slot(&request, &req.extra_service_ids)
        .await?;
    Ok(Json(ApiResponse::success(appointment)))
}

/// POST /api/staff/appointments/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Appointment>>, BookingError> {
    let appointment = state.reservations.cancel(id).await?;
    Ok(Json(ApiResponse::success(appointment)))
}
