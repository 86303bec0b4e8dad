use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;

/// Display-name lookup for peripheral pages. The chat core never calls this.
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.repository.get_user(&id).await {
        Ok(Some(user)) => Ok(Json(user)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get user {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
pub struct UpsertUserRequest {
    display_name: String,
}

pub async fn put_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpsertUserRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.repository.upsert_user(&id, display_name).await {
        Ok(user) => Ok(Json(user)),
        Err(e) => {
            tracing::error!("Failed to upsert user {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
