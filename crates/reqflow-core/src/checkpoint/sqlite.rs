//! SQLite checkpoint store
//!
//! One row per run in `run_checkpoints`, holding the full state as JSON.
//! `save` is an upsert on the run id.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{CheckpointStore, RunSummary};
use crate::domain::{RunId, RunState};
use crate::error::{Error, Result};
use crate::storage::Database;

/// Checkpoints persisted in SQLite
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (and migrate) the database at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let db = Database::open(path)
            .await
            .map_err(|e| Error::CheckpointError(format!("{:#}", e)))?;
        Ok(Self::new(db))
    }

    pub async fn in_memory() -> Result<Self> {
        let db = Database::in_memory()
            .await
            .map_err(|e| Error::CheckpointError(format!("{:#}", e)))?;
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn decode(run_id: &str, json: &str) -> Result<RunState> {
    serde_json::from_str(json).map_err(|e| {
        Error::CheckpointError(format!("checkpoint for run '{}' is unreadable: {}", run_id, e))
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO run_checkpoints (run_id, status, state_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.run_id.as_str())
        .bind(state.status.as_str())
        .bind(&json)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(self.db.pool())
        .await?;

        debug!(run_id = %state.run_id, status = %state.status, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<RunState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM run_checkpoints WHERE run_id = ?")
                .bind(run_id.as_str())
                .fetch_optional(self.db.pool())
                .await?;

        row.map(|(json,)| decode(run_id.as_str(), &json)).transpose()
    }

    async fn list(&self) -> Result<Vec<RunSummary>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT run_id, state_json FROM run_checkpoints ORDER BY updated_at DESC",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|(run_id, json)| decode(run_id, json).map(|state| RunSummary::from(&state)))
            .collect()
    }

    async fn delete(&self, run_id: &RunId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM run_checkpoints WHERE run_id = ?")
            .bind(run_id.as_str())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
