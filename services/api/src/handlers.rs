//! Axum Handlers for the REST API
//!
//! This module contains the logic for inspecting live relay sessions,
//! deciding held instructions out of band and reading the correction log.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use uuid::Uuid;
use voxrelay_core::error::RelayError;

use crate::{
    models::{
        ApprovalView, ApprovePayload, CorrectionView, CorrectionsQuery, ErrorResponse,
        LiveSessionSummary, RejectPayload,
    },
    state::{AppState, LiveSessionEntry},
    ws::provider::{DecisionReply, LiveInput},
};

const DEFAULT_CORRECTIONS_LIMIT: usize = 20;
const MAX_CORRECTIONS_LIMIT: usize = 200;

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Maps a rejected approval decision onto an HTTP error.
fn relay_error(err: RelayError) -> ApiError {
    match err {
        RelayError::NoPendingApproval | RelayError::StaleApproval { .. } => {
            ApiError::Conflict(err.to_string())
        }
        RelayError::SessionClosed => ApiError::NotFound(err.to_string()),
        other => ApiError::BadRequest(other.to_string()),
    }
}

async fn live_session(state: &AppState, id: Uuid) -> Result<LiveSessionEntry, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No live session with id '{}'", id)))
}

/// Hands a decision to the session and waits for the relay's verdict.
async fn decide(
    entry: &LiveSessionEntry,
    make_input: impl FnOnce(DecisionReply) -> LiveInput,
) -> Result<(), ApiError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    entry
        .control
        .send(make_input(reply_tx))
        .await
        .map_err(|_| relay_error(RelayError::SessionClosed))?;
    match reply_rx.await {
        Ok(outcome) => outcome.map_err(relay_error),
        Err(_) => Err(relay_error(RelayError::SessionClosed)),
    }
}

/// List the sessions that currently have an open voice connection.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Live sessions, oldest first", body = [LiveSessionSummary])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<LiveSessionSummary>> {
    let sessions = state
        .sessions
        .list()
        .await
        .into_iter()
        .map(|(id, entry)| LiveSessionSummary {
            id,
            started_at: entry.started_at,
            awaiting_approval: entry.approval.borrow().is_some(),
        })
        .collect();
    Json(sessions)
}

/// Get the instruction currently held for approval.
#[utoipa::path(
    get,
    path = "/sessions/{id}/approval",
    responses(
        (status = 200, description = "The held instruction", body = ApprovalView),
        (status = 404, description = "Session not found or nothing is held", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalView>, ApiError> {
    let entry = live_session(&state, id).await?;
    let pending = entry.approval.borrow().clone();
    pending
        .map(|approval| Json(ApprovalView::from(approval)))
        .ok_or_else(|| ApiError::NotFound("No instruction is awaiting approval".to_string()))
}

/// Approve the held instruction, optionally with edited text.
#[utoipa::path(
    post,
    path = "/sessions/{id}/approval/approve",
    request_body = ApprovePayload,
    responses(
        (status = 204, description = "Instruction released to the agent"),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Nothing held, or the hold id is stale", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApprovePayload>,
) -> Result<StatusCode, ApiError> {
    if payload
        .edited_text
        .as_deref()
        .is_some_and(|text| text.trim().is_empty())
    {
        return Err(ApiError::BadRequest(
            "`edited_text` must not be empty".to_string(),
        ));
    }
    let entry = live_session(&state, id).await?;
    decide(&entry, |reply| LiveInput::Approve {
        hold_id: payload.hold_id,
        edited_text: payload.edited_text,
        reply: Some(reply),
    })
    .await?;
    info!(session_id = %id, "Instruction approved over REST");
    Ok(StatusCode::NO_CONTENT)
}

/// Reject the held instruction.
#[utoipa::path(
    post,
    path = "/sessions/{id}/approval/reject",
    request_body = RejectPayload,
    responses(
        (status = 204, description = "Instruction discarded"),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Nothing held, or the hold id is stale", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectPayload>,
) -> Result<StatusCode, ApiError> {
    let entry = live_session(&state, id).await?;
    decide(&entry, |reply| LiveInput::Reject {
        hold_id: payload.hold_id,
        reply: Some(reply),
    })
    .await?;
    info!(session_id = %id, "Instruction rejected over REST");
    Ok(StatusCode::NO_CONTENT)
}

/// List the most recent corrections the user made to held instructions.
#[utoipa::path(
    get,
    path = "/corrections",
    responses(
        (status = 200, description = "Corrections, newest first", body = [CorrectionView]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(CorrectionsQuery)
)]
pub async fn list_corrections(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CorrectionsQuery>,
) -> Result<Json<Vec<CorrectionView>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CORRECTIONS_LIMIT)
        .min(MAX_CORRECTIONS_LIMIT);
    let records = state.corrections.recent(limit).await?;
    Ok(Json(records.into_iter().map(CorrectionView::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_relay_error_status_codes() {
        assert_eq!(
            status_of(relay_error(RelayError::NoPendingApproval)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(relay_error(RelayError::StaleApproval { hold_id: 2 })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(relay_error(RelayError::SessionClosed)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(relay_error(RelayError::MissingInstruction)),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_anyhow_errors_are_internal() {
        let err: ApiError = anyhow::anyhow!("database is down").into();
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
