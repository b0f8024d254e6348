use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use treehole_core::{DailyLimit, Letter, LetterId, NewLetter, ReplyUpdate, TreeholeError};
use treehole_store_sqlite::SubmissionOutcome;

use crate::gate::ADMIN_TOKEN_HEADER;
use crate::origin::client_origin;
use crate::telemetry::ServiceTelemetrySnapshot;
use crate::{ServiceFailure, ServiceState};

pub(crate) const LETTER_ACCEPTED: &str =
    "Your letter is resting safely in the Tree Hole. Thank you for trusting this space.";
pub(crate) const CONTENT_TOO_SHORT: &str =
    "Please share at least 10 characters so the Tree Hole can hear you.";
pub(crate) const SUBMIT_FAILED: &str = "The Tree Hole is resting. Please try again soon.";
pub(crate) const PUBLIC_SETTINGS_FAILED: &str = "Unable to load public settings.";
pub(crate) const LETTERS_FAILED: &str = "Unable to load letters.";
pub(crate) const INVALID_LETTER_ID: &str = "Invalid letter id";
pub(crate) const INVALID_REPLY_TEXT: &str = "Reply text must be a string.";
pub(crate) const REPLY_SAVED: &str = "Reply saved.";
pub(crate) const REPLY_FAILED: &str = "Unable to save reply.";
pub(crate) const SETTINGS_FAILED: &str = "Unable to load settings.";
pub(crate) const INVALID_DAILY_LIMIT: &str = "Daily limit must be a positive whole number.";
pub(crate) const DAILY_LIMIT_TOO_LARGE: &str = "Daily limit must be at most 4294967295.";
pub(crate) const DAILY_LIMIT_UPDATED: &str = "Daily limit updated.";
pub(crate) const DAILY_LIMIT_UPDATE_FAILED: &str = "Unable to update daily limit.";

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    message: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLimitResponse {
    daily_limit: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLimitUpdatedResponse {
    message: &'static str,
    daily_limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LettersResponse {
    letters: Vec<Letter>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    telemetry: ServiceTelemetrySnapshot,
}

/// Unreadable or non-JSON bodies behave like an empty body.
fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Value {
    match payload {
        Ok(Json(value)) => value,
        Err(rejection) => {
            debug!(rejection = %rejection, "request body is not usable JSON");
            Value::Null
        }
    }
}

/// Counts every request once; failures are counted where they are raised.
pub async fn track_request(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    state.telemetry.record_request();
    let response = next.run(request).await;
    if response.status().is_success() {
        state.telemetry.record_success();
    }
    response
}

pub async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timeout_ms: state.timeout_ms(),
        telemetry: state.telemetry.snapshot(),
    })
}

pub async fn submit_letter(
    State(state): State<ServiceState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<MessageResponse>, ServiceFailure> {
    let body = json_body(payload);
    let origin = client_origin(&headers, peer.map(|ConnectInfo(addr)| addr.ip()));
    let content = body.get("content").and_then(Value::as_str);
    let letter = NewLetter::new(content, origin.clone())
        .map_err(|_| state.reject(ServiceFailure::validation(CONTENT_TOO_SHORT)))?;

    let outcome = state
        .run_blocking(SUBMIT_FAILED, "submit_letter", move |mut store| {
            store.submit_letter(&letter)
        })
        .await?;

    match outcome {
        SubmissionOutcome::Accepted(letter) => {
            info!(letter_id = %letter.id, origin = %letter.origin, "letter accepted");
            Ok(Json(MessageResponse {
                message: LETTER_ACCEPTED,
            }))
        }
        SubmissionOutcome::QuotaExceeded { daily_limit } => {
            info!(origin = %origin, daily_limit = daily_limit.get(), "daily limit reached");
            Err(state.reject(ServiceFailure::quota_exceeded(daily_limit)))
        }
    }
}

async fn current_daily_limit(
    state: &ServiceState,
    failure_message: &'static str,
) -> Result<DailyLimit, ServiceFailure> {
    state
        .run_blocking(failure_message, "daily_limit", |mut store| store.daily_limit())
        .await
}

pub async fn public_settings(
    State(state): State<ServiceState>,
) -> Result<Json<DailyLimitResponse>, ServiceFailure> {
    let limit = current_daily_limit(&state, PUBLIC_SETTINGS_FAILED).await?;
    Ok(Json(DailyLimitResponse {
        daily_limit: limit.get(),
    }))
}

/// Guards every operator route; runs before path or body extraction.
pub async fn require_admin(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceFailure> {
    if let Err(err) = state.gate.authorize(request.headers().get(ADMIN_TOKEN_HEADER)) {
        debug!(path = %request.uri().path(), error = %err, "admin credential rejected");
        return Err(state.reject(ServiceFailure::unauthorized()));
    }
    Ok(next.run(request).await)
}

pub async fn admin_letters(
    State(state): State<ServiceState>,
) -> Result<Json<LettersResponse>, ServiceFailure> {
    let letters = state
        .run_blocking(LETTERS_FAILED, "list_letters", |store| store.list_letters())
        .await?;
    Ok(Json(LettersResponse { letters }))
}

pub async fn admin_reply(
    State(state): State<ServiceState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<MessageResponse>, ServiceFailure> {
    let id = LetterId::parse(&raw_id)
        .map_err(|_| state.reject(ServiceFailure::validation(INVALID_LETTER_ID)))?;

    let update = match json_body(payload).get("replyText") {
        None | Some(Value::Null) => ReplyUpdate::Clear,
        Some(Value::String(text)) => ReplyUpdate::normalize(Some(text.as_str())),
        Some(_) => return Err(state.reject(ServiceFailure::validation(INVALID_REPLY_TEXT))),
    };
    let replied = update.text().is_some();

    let matched = state
        .run_blocking(REPLY_FAILED, "set_reply", move |store| store.set_reply(id, &update))
        .await?;

    if matched {
        info!(letter_id = %id, replied, "reply updated");
    } else {
        warn!(letter_id = %id, "reply target not found, nothing updated");
    }
    Ok(Json(MessageResponse {
        message: REPLY_SAVED,
    }))
}

pub async fn admin_settings(
    State(state): State<ServiceState>,
) -> Result<Json<DailyLimitResponse>, ServiceFailure> {
    let limit = current_daily_limit(&state, SETTINGS_FAILED).await?;
    Ok(Json(DailyLimitResponse {
        daily_limit: limit.get(),
    }))
}

pub async fn admin_set_daily_limit(
    State(state): State<ServiceState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<DailyLimitUpdatedResponse>, ServiceFailure> {
    let limit = DailyLimit::from_json(json_body(payload).get("dailyLimit")).map_err(|err| {
        let message = match err {
            TreeholeError::LimitTooLarge { .. } => DAILY_LIMIT_TOO_LARGE,
            _ => INVALID_DAILY_LIMIT,
        };
        state.reject(ServiceFailure::validation(message))
    })?;

    state
        .run_blocking(DAILY_LIMIT_UPDATE_FAILED, "set_daily_limit", move |store| {
            store.set_daily_limit(limit)
        })
        .await?;

    info!(daily_limit = limit.get(), "daily limit updated");
    Ok(Json(DailyLimitUpdatedResponse {
        message: DAILY_LIMIT_UPDATED,
        daily_limit: limit.get(),
    }))
}
