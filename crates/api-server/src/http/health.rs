use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shared::models::{OkResponse, ReadinessResponse};
use tracing::warn;

use super::AppState;
use super::errors::service_unavailable_response;

pub(super) async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(OkResponse { ok: true }))
}

/// Ready once the chat log store answers. Also reports how many session
/// contexts are held in memory and whether an evaluation pass is active here.
pub(super) async fn readyz(State(state): State<AppState>) -> Response {
    if let Err(err) = state.store.ping().await {
        warn!("readiness check failed: {err}");
        return service_unavailable_response("db_unavailable", "Chat log store not ready");
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            ok: true,
            active_contexts: state.chat_logs.contexts().len(),
            evaluation_running: state.scheduler.is_running(),
        }),
    )
        .into_response()
}
