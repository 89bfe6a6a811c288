use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shared::evaluation::EvaluationError;
use shared::models::EvaluationRunResponse;
use tracing::{error, info};

use super::AppState;
use super::errors::{conflict_response, internal_error_response, store_error_response};

/// Runs one evaluation pass on a detached task. A client that disconnects
/// drops only the wait; the pass keeps going and honours server shutdown
/// between conversations.
pub(super) async fn run_evaluation(State(state): State<AppState>) -> Response {
    info!("on-demand evaluation run requested");

    let scheduler = state.scheduler.clone();
    let shutdown = state.shutdown.clone();
    let run = tokio::spawn(async move { scheduler.run_with_shutdown(&shutdown).await });

    match run.await {
        Ok(Ok(report)) => (StatusCode::OK, Json(EvaluationRunResponse { report })).into_response(),
        Ok(Err(EvaluationError::AlreadyRunning)) => conflict_response(
            "evaluation_in_progress",
            "An evaluation run is already in progress",
        ),
        Ok(Err(EvaluationError::Store(err))) => store_error_response(err),
        Err(err) => {
            error!("evaluation task failed: {err}");
            internal_error_response()
        }
    }
}
