use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, warn};

use crate::AppState;

pub async fn get_database_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.db.get_stats().await {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => {
            error!("Failed to get database stats: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Wipe every stored message and directory entry. Open channels are untouched.
pub async fn clear_all_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    warn!("API: Clearing all application data");
    match state.db.clear_all().await {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => {
            error!("Failed to clear application data: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
