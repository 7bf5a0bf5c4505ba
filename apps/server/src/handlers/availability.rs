use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use super::parse_date_field;
use crate::{
    catalog,
    clock::format_hhmm,
    error::BookingError,
    models::{ApiResponse, FreeSlotsQuery},
    AppState,
};

/// GET /api/barbers/{barber_id}/free-slots?date=YYYY-MM-DD
pub async fn free_slots(
    State(state): State<Arc<AppState>>,
    Path(barber_id): Path<i64>,
    Query(query): Query<FreeSlotsQuery>,
) -> Result<Json<ApiResponse<Vec<String>>>, BookingError> {
    let date = parse_date_field(&query.date, "date")?;
    catalog::barber_by_id(&state.db, barber_id).await?;

    let slots = state.availability.free_slots(barber_id, date).await?;
    Ok(Json(ApiResponse::success(
        slots.into_iter().map(format_hhmm).collect(),
    )))
}
