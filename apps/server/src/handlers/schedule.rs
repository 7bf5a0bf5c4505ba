use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::{parse_date_field, parse_time_field};
use crate::{error::BookingError, models::*, schedule, AppState};

/// POST /api/staff/barbers/{barber_id}/weekly-schedule
pub async fn add_weekly_window(
    State(state): State<Arc<AppState>>,
    Path(barber_id): Path<i64>,
    Json(req): Json<WeeklyWindowRequest>,
) -> Result<Json<ApiResponse<WeeklySchedule>>, BookingError> {
    let entry = schedule::add_weekly_window(
        &state.db,
        barber_id,
        req.day_of_week,
        &req.start_time,
        &req.end_time,
    )
    .await?;
    Ok(Json(ApiResponse::success(entry)))
}

/// POST /api/staff/barbers/{barber_id}/exceptional-days
pub async fn add_exceptional_window(
    State(state): State<Arc<AppState>>,
    Path(barber_id): Path<i64>,
    Json(req): Json<ExceptionalWindowRequest>,
) -> Result<Json<ApiResponse<ExceptionalDay>>, BookingError> {
    let date = parse_date_field(&req.date, "date")?;
    let entry =
        schedule::add_exceptional_window(&state.db, barber_id, date, &req.start_time, &req.end_time)
            .await?;
    Ok(Json(ApiResponse::success(entry)))
}

/// POST /api/staff/barbers/{barber_id}/manual-blocks
pub async fn add_manual_block(
    State(state): State<Arc<AppState>>,
    Path(barber_id): Path<i64>,
    Json(req): Json<ManualBlockRequest>,
) -> Result<Json<ApiResponse<ManualBlock>>, BookingError> {
    let date = parse_date_field(&req.date, "date")?;
    let time = parse_time_field(&req.time, "time")?;
    let block = schedule::add_manual_block(&state.db, barber_id, date, time).await?;
    Ok(Json(ApiResponse::success(block)))
}
