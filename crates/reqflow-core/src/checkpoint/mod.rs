//! Checkpoint store
//!
//! Durable snapshots of [`RunState`] keyed by run id. `save` is an
//! idempotent overwrite; `load` returns the latest snapshot. Stores are
//! shared by every run in the process, so writes to one run id never block
//! writes to another.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RunId, RunState, RunStatus};
use crate::error::Result;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

/// Listing row for a stored run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub source_ref: String,
    pub target_subsystem: String,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&RunState> for RunSummary {
    fn from(state: &RunState) -> Self {
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            source_ref: state.input.source_ref.clone(),
            target_subsystem: state.input.target_subsystem.clone(),
            iteration: state.iteration,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `state`, replacing any earlier snapshot of the same run
    async fn save(&self, state: &RunState) -> Result<()>;

    async fn load(&self, run_id: &RunId) -> Result<Option<RunState>>;

    /// Summaries of every stored run, most recently updated first
    async fn list(&self) -> Result<Vec<RunSummary>>;

    /// Remove a run; returns whether it existed
    async fn delete(&self, run_id: &RunId) -> Result<bool>;
}
