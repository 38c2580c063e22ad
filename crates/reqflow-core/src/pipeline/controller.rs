//! Run controller
//!
//! Drives one run through the routing controller, one stage at a time.
//! After every transition the new state is written to the checkpoint store
//! and only then broadcast. Cancellation is checked before each stage and
//! when each stage returns; a cancelled stage's result is discarded.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::routing::{self, Route};
use crate::checkpoint::CheckpointStore;
use crate::domain::{ErrorKind, ErrorLogEntry, RunFailure, RunState, RunStatus, Stage};
use crate::error::Result;
use crate::events::{ProgressBroadcaster, ProgressEvent, ProgressKind};
use crate::stages::{StageContext, StageError, StageFailure, StageRegistry};

/// Single-run driver
pub struct RunController {
    registry: StageRegistry,
    store: Arc<dyn CheckpointStore>,
    events: Arc<ProgressBroadcaster>,
    ctx: StageContext,
}

impl RunController {
    pub fn new(
        registry: StageRegistry,
        store: Arc<dyn CheckpointStore>,
        events: Arc<ProgressBroadcaster>,
        ctx: StageContext,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            ctx,
        }
    }

    /// Run until the state reaches a terminal status
    ///
    /// Only checkpoint write failures are returned as errors; every stage
    /// failure is recorded in the state instead.
    pub async fn drive(&self, mut state: RunState) -> Result<RunState> {
        info!(run_id = %state.run_id, last = ?state.last_completed, "Driving run");

        loop {
            if self.ctx.cancel.is_cancelled() {
                return self.finish_cancelled(state).await;
            }

            let (stage, transition) = match routing::next(&state) {
                Route::Complete => return self.finish_completed(state).await,
                Route::Abort(reason) => return self.finish_failed(state, reason).await,
                Route::Enter(stage, transition) => (stage, transition),
            };

            transition.apply(&mut state);

            if stage == Stage::Review {
                if let Some(reason) = state.pending_review.filter(|_| state.input.interactive) {
                    self.ctx.reviews.arm();
                    state.status = RunStatus::AwaitingReview;
                    self.checkpoint(&state).await?;
                    self.emit(
                        &state,
                        ProgressKind::ReviewNeeded {
                            reason,
                            score: state.quality.as_ref().map(|m| m.overall),
                        },
                    );
                }
            }

            self.emit(
                &state,
                ProgressKind::StageStarted {
                    stage,
                    iteration: state.iteration,
                },
            );
            info!(run_id = %state.run_id, %stage, iteration = state.iteration, "Stage started");

            let result = match self.registry.get(stage) {
                Some(executor) => executor.execute(&state, &self.ctx).await,
                None => Err(StageFailure::new(StageError::Precondition(format!(
                    "no executor registered for stage {}",
                    stage
                )))),
            };

            if self.ctx.cancel.is_cancelled() {
                debug!(run_id = %state.run_id, %stage, "Discarding result of cancelled stage");
                return self.finish_cancelled(state).await;
            }

            match result {
                Ok(patch) => match state.clone().merge(stage, patch) {
                    Ok(merged) => {
                        state = merged;
                        state.status = RunStatus::Running;
                        self.checkpoint(&state).await?;
                        let score = match stage {
                            Stage::Validate => state.quality.as_ref().map(|m| m.overall),
                            _ => None,
                        };
                        info!(
                            run_id = %state.run_id,
                            %stage,
                            iteration = state.iteration,
                            score,
                            "Stage completed"
                        );
                        self.emit(
                            &state,
                            ProgressKind::StageCompleted {
                                stage,
                                iteration: state.iteration,
                                score,
                            },
                        );
                    }
                    Err(e) => {
                        error!(run_id = %state.run_id, %stage, error = %e, "Failed to merge stage output");
                        let message = e.to_string();
                        state.record_failure(
                            RunFailure {
                                stage,
                                kind: ErrorKind::Fatal,
                                message: message.clone(),
                            },
                            vec![ErrorLogEntry::new(ErrorKind::Fatal, stage, message)],
                        );
                        state.status = RunStatus::Running;
                        self.checkpoint(&state).await?;
                    }
                },
                Err(failure) if failure.is_cancelled() => {
                    return self.finish_cancelled(state).await;
                }
                Err(mut failure) => {
                    if let Some(allocation) = failure.allocation.take() {
                        state.allocation = Some(allocation);
                    }
                    let (flag, errors, fallback_uses) = failure.into_record(stage);
                    warn!(
                        run_id = %state.run_id,
                        %stage,
                        kind = %flag.kind,
                        error = %flag.message,
                        "Stage failed"
                    );
                    state.record_failure(flag, errors);
                    state.fallback_uses += fallback_uses;
                    state.status = RunStatus::Running;
                    self.checkpoint(&state).await?;
                }
            }
        }
    }

    async fn checkpoint(&self, state: &RunState) -> Result<()> {
        self.store.save(state).await.inspect_err(|e| {
            error!(run_id = %state.run_id, error = %e, "Checkpoint write failed");
        })?;
        debug!(run_id = %state.run_id, status = %state.status, "Checkpoint written");
        Ok(())
    }

    fn emit(&self, state: &RunState, kind: ProgressKind) {
        self.events
            .emit(ProgressEvent::new(state.run_id.clone(), kind));
    }

    async fn finish_completed(&self, mut state: RunState) -> Result<RunState> {
        state.status = RunStatus::Completed;
        state.pending_review = None;
        self.checkpoint(&state).await?;
        info!(
            run_id = %state.run_id,
            outcome = ?state.outcome,
            iterations = state.iteration,
            fallback_uses = state.fallback_uses,
            "Run completed"
        );
        self.emit(
            &state,
            ProgressKind::RunCompleted {
                outcome: state.outcome,
                artifacts: state.artifacts.clone(),
            },
        );
        Ok(state)
    }

    async fn finish_failed(&self, mut state: RunState, reason: String) -> Result<RunState> {
        state.status = RunStatus::Failed;
        state.pending_review = None;
        self.checkpoint(&state).await?;
        warn!(run_id = %state.run_id, %reason, "Run ended with error");
        self.emit(&state, ProgressKind::RunFailed { reason });
        Ok(state)
    }

    async fn finish_cancelled(&self, mut state: RunState) -> Result<RunState> {
        let stage = state.last_completed.unwrap_or(Stage::Extract);
        state
            .errors
            .push(ErrorLogEntry::new(ErrorKind::Fatal, stage, "run cancelled"));
        state.status = RunStatus::Cancelled;
        state.pending_review = None;
        self.checkpoint(&state).await?;
        info!(run_id = %state.run_id, "Run cancelled");
        self.emit(
            &state,
            ProgressKind::RunFailed {
                reason: "cancelled".to_string(),
            },
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::domain::{RunInput, RunOutcome};
    use crate::stages::test_support::{Replay, context};

    fn controller(
        replies: Vec<&str>,
        dir: &std::path::Path,
    ) -> (RunController, Arc<MemoryCheckpointStore>, Arc<ProgressBroadcaster>) {
        let store = Arc::new(MemoryCheckpointStore::new());
        let events = Arc::new(ProgressBroadcaster::default());
        let ctx = context(Replay::new(replies), dir.to_path_buf());
        (
            RunController::new(StageRegistry::standard(), store.clone(), events.clone(), ctx),
            store,
            events,
        )
    }

    #[tokio::test]
    async fn test_zero_extracted_reaches_document() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, store, events) = controller(vec![r#"{"requirements": []}"#], dir.path());
        let mut rx = events.subscribe();
        let state = RunState::new(RunInput::new("doc.txt", "Nothing here.", "Navigation"));

        let done = controller.drive(state).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.outcome, Some(RunOutcome::NoRequirements));
        assert!(done.failure.is_none());
        assert_eq!(store.load(&done.run_id).await.unwrap(), Some(done.clone()));

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind.name());
        }
        assert_eq!(
            kinds,
            vec![
                "stage_started",
                "stage_completed",
                "stage_started",
                "stage_completed",
                "run_completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_fatal_extract_failure_ends_run() {
        let dir = tempfile::tempdir().unwrap();
        // No replies: the replay client answers NotFound, which is fatal
        let (controller, _, _) = controller(vec![], dir.path());
        let state = RunState::new(
            RunInput::new("doc.txt", "The system shall report position.", "Navigation")
                .with_interactive(true),
        );

        let done = controller.drive(state).await.unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        let failure = done.failure.unwrap();
        assert_eq!(failure.stage, Stage::Extract);
        assert_eq!(failure.kind, ErrorKind::Fatal);
        assert!(!done.errors.is_empty());
        assert!(done.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, store, _) = controller(vec![], dir.path());
        controller.ctx.cancel.cancel();
        let state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));

        let done = controller.drive(state).await.unwrap();
        assert_eq!(done.status, RunStatus::Cancelled);
        assert!(done.last_completed.is_none());
        let stored = store.load(&done.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Cancelled);
    }
}
