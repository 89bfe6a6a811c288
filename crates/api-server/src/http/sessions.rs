use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use shared::chat_log_service::{AppendTurn, StartSession};
use shared::models::{
    AppendTurnRequest, AppendTurnResponse, OkResponse, SessionContextResponse,
    StartSessionRequest, StartSessionResponse,
};
use tracing::info;

use super::AppState;
use super::errors::{not_found_response, pipeline_error_response};

pub(super) async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartSessionRequest>,
) -> Response {
    let source_address = req
        .source_address
        .or_else(|| forwarded_source_address(&headers));

    match state
        .chat_logs
        .start_session(StartSession {
            source_address,
            latitude: req.latitude,
            longitude: req.longitude,
            city: req.city,
        })
        .await
    {
        Ok(session_id) => {
            (StatusCode::CREATED, Json(StartSessionResponse { session_id })).into_response()
        }
        Err(err) => pipeline_error_response(err),
    }
}

pub(super) async fn append_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AppendTurnRequest>,
) -> Response {
    let source_address = req
        .source_address
        .or_else(|| forwarded_source_address(&headers));

    match state
        .chat_logs
        .submit_turn(AppendTurn {
            session_id,
            text: req.text,
            location: req.location,
            source_address,
        })
        .await
    {
        Ok(submitted) => (
            StatusCode::OK,
            Json(AppendTurnResponse {
                chat_log: submitted.chat_log,
                context: submitted.context,
            }),
        )
            .into_response(),
        Err(err) => pipeline_error_response(err),
    }
}

pub(super) async fn get_context(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.chat_logs.contexts().get_context(&session_id) {
        Some(context) => (
            StatusCode::OK,
            Json(SessionContextResponse {
                session_id,
                context,
            }),
        )
            .into_response(),
        None => not_found_response("session_not_found", "Session context not found or expired"),
    }
}

pub(super) async fn delete_context(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.chat_logs.contexts().delete_context(&session_id) {
        info!(session_id = %session_id, "session context deleted");
        (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
    } else {
        not_found_response("session_not_found", "Session context not found or expired")
    }
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_source_address(headers: &HeaderMap) -> Option<String> {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    forwarded_for
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .map(str::to_string)
}
