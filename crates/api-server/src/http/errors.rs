use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shared::chat_log_service::PipelineError;
use shared::models::{ErrorBody, ErrorResponse};
use shared::repos::StoreError;
use tracing::{error, warn};

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
        .into_response()
}

pub(super) fn bad_request_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, code, message)
}

pub(super) fn not_found_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, code, message)
}

pub(super) fn conflict_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::CONFLICT, code, message)
}

pub(super) fn bad_gateway_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::BAD_GATEWAY, code, message)
}

pub(super) fn service_unavailable_response(code: &str, message: &str) -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, code, message)
}

pub(super) fn internal_error_response() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Unexpected server error",
    )
}

pub(super) fn store_error_response(err: StoreError) -> Response {
    error!("database operation failed: {err}");
    internal_error_response()
}

pub(super) fn pipeline_error_response(err: PipelineError) -> Response {
    match err {
        PipelineError::Validation(message) => bad_request_response("invalid_request", &message),
        PipelineError::UnknownSession(_) => {
            not_found_response("session_not_found", "Session context not found or expired")
        }
        PipelineError::Dependency(err) => {
            warn!("risk evaluator unavailable: {err}");
            bad_gateway_response(
                "risk_evaluator_unavailable",
                "Risk evaluation failed; the turn was not saved",
            )
        }
        PipelineError::Store(err) => store_error_response(err),
    }
}
