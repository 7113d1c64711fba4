use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use crate::AppState;
use crate::models::HistoryQuery;

/// Stored messages for a company, oldest first.
pub async fn company_history_handler(
    State(state): State<AppState>,
    Path(company_code): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = state.history_config.clamp(query.limit);
    match state
        .repository
        .get_company_history(&company_code, limit)
        .await
    {
        Ok(messages) => Ok(Json(messages)),
        Err(e) => {
            error!("Failed to load history for company {}: {}", company_code, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Stored records for a room (CREATE/JOIN audit rows included), oldest first.
pub async fn room_history_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = state.history_config.clamp(query.limit);
    match state.repository.get_room_history(&room_id, limit).await {
        Ok(messages) => Ok(Json(messages)),
        Err(e) => {
            error!("Failed to load history for room {}: {}", room_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
