//! Data Access Layer
//!
//! This module contains all the functions for interacting with the PostgreSQL database.
//! Queries are checked at runtime so the crate builds without a live database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use voxrelay_core::{
    approval::CorrectionRecord, correction::CorrectionStore, history::Turn,
};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

#[derive(FromRow)]
struct CorrectionRow {
    original: String,
    edited: String,
    audio: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl From<CorrectionRow> for CorrectionRecord {
    fn from(row: CorrectionRow) -> Self {
        Self {
            original: row.original,
            edited: row.edited,
            audio: row.audio,
            created_at: row.created_at,
        }
    }
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Stores an (original, edited) pair.
    pub async fn add_correction(&self, record: &CorrectionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO corrections (original, edited, audio, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.original)
        .bind(&record.edited)
        .bind(&record.audio)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert correction")?;
        Ok(())
    }

    /// Most recent corrections, newest first.
    pub async fn recent_corrections(&self, limit: usize) -> Result<Vec<CorrectionRecord>> {
        let rows = sqlx::query_as::<_, CorrectionRow>(
            r#"
            SELECT original, edited, audio, created_at
            FROM corrections
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CorrectionRecord::from).collect())
    }

    /// Persists a committed turn. A rewound and re-committed index replaces
    /// the earlier row.
    pub async fn add_turn(&self, session_id: Uuid, turn: &Turn) -> Result<()> {
        let turn_index = i32::try_from(turn.index).context("Turn index out of range")?;
        sqlx::query(
            r#"
            INSERT INTO turns
                (session_id, turn_index, user_text, voice_text, instruction, agent_text, blocks, committed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (session_id, turn_index) DO UPDATE SET
                user_text = EXCLUDED.user_text,
                voice_text = EXCLUDED.voice_text,
                instruction = EXCLUDED.instruction,
                agent_text = EXCLUDED.agent_text,
                blocks = EXCLUDED.blocks,
                committed_at = EXCLUDED.committed_at
            "#,
        )
        .bind(session_id)
        .bind(turn_index)
        .bind(&turn.user_text)
        .bind(&turn.voice_text)
        .bind(&turn.instruction)
        .bind(&turn.agent_text)
        .bind(serde_json::Value::from(turn.blocks.clone()))
        .bind(turn.committed_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert turn")?;
        Ok(())
    }

    /// Deletes a session's persisted turns from `from` on.
    pub async fn delete_turns_from(&self, session_id: Uuid, from: usize) -> Result<u64> {
        let from = i32::try_from(from).context("Turn index out of range")?;
        let result = sqlx::query("DELETE FROM turns WHERE session_id = $1 AND turn_index >= $2")
            .bind(session_id)
            .bind(from)
            .execute(&self.pool)
            .await
            .context("Failed to delete turns")?;
        Ok(result.rows_affected())
    }
}

/// The correction sink backed by the `corrections` table.
pub struct PgCorrectionStore {
    db: std::sync::Arc<Db>,
}

impl PgCorrectionStore {
    pub fn new(db: std::sync::Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CorrectionStore for PgCorrectionStore {
    async fn record(&self, record: CorrectionRecord) -> Result<()> {
        self.db.add_correction(&record).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<CorrectionRecord>> {
        self.db.recent_corrections(limit).await
    }
}
