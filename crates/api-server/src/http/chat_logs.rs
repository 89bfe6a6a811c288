use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use shared::models::{
    ChatLogSearchRequest, ListChatLogsResponse, ListPredictionsResponse, RiskLevel,
};
use shared::repos::ChatLogFilter;

use super::AppState;
use super::errors::{bad_request_response, store_error_response};

const ALL_CITIES: &str = "all";

#[derive(Debug, Deserialize)]
pub(super) struct ListChatLogsQuery {
    risk_level: Option<String>,
}

pub(super) async fn list_chat_logs(
    State(state): State<AppState>,
    Query(query): Query<ListChatLogsQuery>,
) -> Response {
    let risk_level = match query
        .risk_level
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(raw) => match RiskLevel::parse(raw) {
            Some(level) => Some(level),
            None => {
                return bad_request_response(
                    "invalid_risk_level",
                    "risk_level must be one of normal, low, moderate or high",
                );
            }
        },
        None => None,
    };

    respond_with_chat_logs(
        &state,
        ChatLogFilter {
            risk_level,
            city: None,
        },
    )
    .await
}

/// Unknown risk levels match everything; `all` or a blank city disables the
/// city filter.
pub(super) async fn search_chat_logs(
    State(state): State<AppState>,
    Json(req): Json<ChatLogSearchRequest>,
) -> Response {
    respond_with_chat_logs(&state, search_filter(&req)).await
}

pub(super) async fn list_predictions(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.list_predictions(&session_id).await {
        Ok(items) => (
            StatusCode::OK,
            Json(ListPredictionsResponse {
                count: items.len(),
                items,
            }),
        )
            .into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn respond_with_chat_logs(state: &AppState, filter: ChatLogFilter) -> Response {
    match state.store.list_chat_logs(&filter).await {
        Ok(items) => (
            StatusCode::OK,
            Json(ListChatLogsResponse {
                count: items.len(),
                items,
            }),
        )
            .into_response(),
        Err(err) => store_error_response(err),
    }
}

fn search_filter(req: &ChatLogSearchRequest) -> ChatLogFilter {
    let risk_level = req.risk_level.as_deref().and_then(RiskLevel::parse);
    let city = req
        .city
        .as_deref()
        .map(str::trim)
        .filter(|city| !city.is_empty() && !city.eq_ignore_ascii_case(ALL_CITIES))
        .map(str::to_string);

    ChatLogFilter { risk_level, city }
}
