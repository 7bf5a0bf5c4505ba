use axum::{extract::State, Json};
use std::sync::Arc;

use crate::{
    error::BookingError,
    models::ApiResponse,
    reaper::{ReapReport, ReaperStats},
    AppState,
};

/// POST /api/admin/reaper/run
pub async fn run_reaper(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ReapReport>> {
    Json(ApiResponse::success(state.reaper.run_now().await))
}

/// GET /api/admin/reaper/stats
pub async fn reaper_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<ReaperStats>>, BookingError> {
    Ok(Json(ApiResponse::success(state.reaper.stats().await?)))
}
