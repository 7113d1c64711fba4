use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::auth::MaybeAuthUser;
use crate::ws;

/// Company chat. With auth enabled the middleware has already required an
/// identity; it becomes the default (and only permitted) sender.
pub async fn tenant_websocket_handler(
    State(state): State<AppState>,
    maybe_user: MaybeAuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let mode = state.tenant.clone();
    let metrics = state.metrics.clone();
    let identity = maybe_user.into_user_id();

    ws.on_upgrade(move |socket| ws::serve_socket(socket, mode, metrics, identity))
}

pub async fn room_websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let mode = state.room.clone();
    let metrics = state.metrics.clone();

    ws.on_upgrade(move |socket| ws::serve_socket(socket, mode, metrics, None))
}

pub async fn global_websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let mode = state.global.clone();
    let metrics = state.metrics.clone();

    ws.on_upgrade(move |socket| ws::serve_socket(socket, mode, metrics, None))
}
