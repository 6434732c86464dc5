use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tracing::error;

use crate::deferral::{DeferRequest, DeferralError};

use super::auth::authenticate;
use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub(super) struct NowParams {
    now: Option<String>,
}

/// POST /api/threads/{thread_id}/defer
pub(super) async fn defer_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user_id = match authenticate(&state.auth, &headers).await {
        Ok(id) => id,
        Err((status, msg)) => return error_response(status, msg),
    };

    let mut request: DeferRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    request.thread_id = Some(thread_id);
    let (thread_id, defer_until) = match request.validate() {
        Ok(values) => values,
        Err(err) => return deferral_error_response(err),
    };

    let deferrals = state.deferrals.clone();
    match task::spawn_blocking(move || deferrals.defer(user_id, thread_id, defer_until)).await {
        Ok(Ok(record)) => (StatusCode::CREATED, Json(record)).into_response(),
        Ok(Err(err)) => deferral_error_response(err),
        Err(err) => join_error_response(err),
    }
}

/// POST /api/deferrals/reconcile
pub(super) async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user_id = match authenticate(&state.auth, &headers).await {
        Ok(id) => id,
        Err((status, msg)) => return error_response(status, msg),
    };

    let params: NowParams = if body.iter().all(u8::is_ascii_whitespace) {
        NowParams::default()
    } else {
        match parse_body(&body) {
            Ok(params) => params,
            Err(response) => return response,
        }
    };
    let now = match resolve_now(params.now.as_deref()) {
        Ok(now) => now,
        Err(response) => return response,
    };

    let deferrals = state.deferrals.clone();
    match task::spawn_blocking(move || deferrals.reconcile_due(user_id, now)).await {
        Ok(Ok(processed)) => {
            (StatusCode::OK, Json(json!({ "processed": processed }))).into_response()
        }
        Ok(Err(err)) => deferral_error_response(err),
        Err(err) => join_error_response(err),
    }
}

/// GET /api/deferrals/due
pub(super) async fn due(
    State(state): State<AppState>,
    Query(params): Query<NowParams>,
    headers: HeaderMap,
) -> Response {
    let user_id = match authenticate(&state.auth, &headers).await {
        Ok(id) => id,
        Err((status, msg)) => return error_response(status, msg),
    };
    let now = match resolve_now(params.now.as_deref()) {
        Ok(now) => now,
        Err(response) => return response,
    };

    let deferrals = state.deferrals.clone();
    match task::spawn_blocking(move || deferrals.due_deferrals(user_id, now)).await {
        Ok(Ok(due)) => (StatusCode::OK, Json(json!({ "due": due }))).into_response(),
        Ok(Err(err)) => deferral_error_response(err),
        Err(err) => join_error_response(err),
    }
}

/// GET /api/threads/{thread_id}/deferrals
pub(super) async fn thread_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user_id = match authenticate(&state.auth, &headers).await {
        Ok(id) => id,
        Err((status, msg)) => return error_response(status, msg),
    };
    let thread_id = match uuid::Uuid::parse_str(thread_id.trim()) {
        Ok(id) => id,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid thread_id: {}", thread_id),
            )
        }
    };

    let deferrals = state.deferrals.clone();
    match task::spawn_blocking(move || deferrals.thread_deferrals(user_id, thread_id)).await {
        Ok(Ok(history)) => {
            (StatusCode::OK, Json(json!({ "deferrals": history }))).into_response()
        }
        Ok(Err(err)) => deferral_error_response(err),
        Err(err) => join_error_response(err),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|err| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid JSON body: {}", err),
        )
    })
}

fn resolve_now(raw: Option<&str>) -> Result<DateTime<Utc>, Response> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(Utc::now()),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| {
                error_response(StatusCode::BAD_REQUEST, format!("invalid now: {}", value))
            }),
    }
}

fn deferral_error_response(err: DeferralError) -> Response {
    match err {
        DeferralError::NotFound(_) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        DeferralError::Validation(_) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        DeferralError::Store(_) => {
            error!("deferral store error: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

fn join_error_response(err: task::JoinError) -> Response {
    error!("spawn_blocking panicked: {}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
