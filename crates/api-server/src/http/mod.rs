use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use shared::chat_log_service::ChatLogService;
use shared::evaluation::RiskEvaluationScheduler;
use shared::repos::ChatLogStore;
use tokio::sync::watch;

mod chat_logs;
mod errors;
mod evaluations;
mod health;
mod sessions;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatLogStore>,
    pub chat_logs: Arc<ChatLogService>,
    pub scheduler: RiskEvaluationScheduler,
    /// Flips to `true` when the server begins shutting down.
    pub shutdown: watch::Receiver<bool>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/v1/sessions", post(sessions::start_session))
        .route("/v1/sessions/{session_id}/turns", post(sessions::append_turn))
        .route(
            "/v1/sessions/{session_id}/context",
            get(sessions::get_context).delete(sessions::delete_context),
        )
        .route("/v1/chat-logs", get(chat_logs::list_chat_logs))
        .route("/v1/chat-logs/search", post(chat_logs::search_chat_logs))
        .route(
            "/v1/chat-logs/{session_id}/predictions",
            get(chat_logs::list_predictions),
        )
        .route(
            "/v1/admin/evaluations/run",
            post(evaluations::run_evaluation),
        )
        .with_state(app_state)
}
