use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::error;

use crate::AppState;
use crate::ws::TopicStats;

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

#[derive(Serialize)]
pub struct TopicsResponse {
    tenant: Vec<TopicStats>,
    room: Vec<TopicStats>,
    global_subscribers: usize,
}

/// Live topics per mode, with subscriber counts.
pub async fn list_topics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(TopicsResponse {
        tenant: state.tenant.registry().snapshot(),
        room: state.room.registry().snapshot(),
        global_subscribers: state.global.subscriber_count(),
    })
}
