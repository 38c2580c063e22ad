//! In-process checkpoint store

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CheckpointStore, RunSummary};
use crate::domain::{RunId, RunState};
use crate::error::Result;

/// Checkpoints held in a sharded map; lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: DashMap<RunId, RunState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<()> {
        self.runs.insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<RunState>> {
        Ok(self.runs.get(run_id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<RunSummary>> {
        let mut summaries: Vec<RunSummary> = self
            .runs
            .iter()
            .map(|entry| RunSummary::from(entry.value()))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.runs.remove(run_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunInput, RunStatus};

    #[tokio::test]
    async fn test_save_is_idempotent_overwrite() {
        let store = MemoryCheckpointStore::new();
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();
        assert_eq!(store.len(), 1);

        state.status = RunStatus::Completed;
        store.save(&state).await.unwrap();
        let loaded = store.load(&state.run_id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = MemoryCheckpointStore::new();
        let older = RunState::new(RunInput::new("a.txt", "text", "Navigation"));
        let mut newer = RunState::new(RunInput::new("b.txt", "text", "Power"));
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list[0].run_id, newer.run_id);
        assert_eq!(list[1].source_ref, "a.txt");

        assert!(store.delete(&older.run_id).await.unwrap());
        assert!(!store.delete(&older.run_id).await.unwrap());
        assert!(store.load(&older.run_id).await.unwrap().is_none());
    }
}
