//! API and Database Models
//!
//! This module defines the data structures used for both database mapping
//! with `sqlx` and for generating OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use voxrelay_core::approval::{CorrectionRecord, PendingApproval};

/// A browser session with an open relay runtime.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct LiveSessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Whether an instruction is currently waiting for approval.
    pub awaiting_approval: bool,
}

/// An instruction held for approval.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ApprovalView {
    pub hold_id: u64,
    #[schema(example = "run the tests in the api crate")]
    pub instruction: String,
    /// Corrector output, when it differs from the instruction.
    pub corrected: Option<String>,
    /// The text that is sent when approved without edits.
    pub proposed_text: String,
    pub audio_bytes: usize,
    pub created_at: DateTime<Utc>,
}

impl From<PendingApproval> for ApprovalView {
    fn from(approval: PendingApproval) -> Self {
        Self {
            proposed_text: approval.proposed_text().to_string(),
            hold_id: approval.hold_id,
            instruction: approval.instruction,
            corrected: approval.corrected,
            audio_bytes: approval.audio_bytes,
            created_at: approval.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Default)]
#[serde(default)]
pub struct ApprovePayload {
    /// Must match the current hold when given.
    pub hold_id: Option<u64>,
    #[schema(example = "run the tests in the api crate")]
    pub edited_text: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug, Default)]
#[serde(default)]
pub struct RejectPayload {
    pub hold_id: Option<u64>,
}

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone, PartialEq)]
pub struct CorrectionView {
    #[schema(example = "run the test in the A.P.I. crate")]
    pub original: String,
    #[schema(example = "run the tests in the api crate")]
    pub edited: String,
    pub created_at: DateTime<Utc>,
}

impl From<CorrectionRecord> for CorrectionView {
    fn from(record: CorrectionRecord) -> Self {
        Self {
            original: record.original,
            edited: record.edited,
            created_at: record.created_at,
        }
    }
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
pub struct CorrectionsQuery {
    /// Maximum number of records, newest first. Defaults to 20.
    pub limit: Option<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
