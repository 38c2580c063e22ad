//! Run manager
//!
//! The run control surface: start, resume, status, cancel, resolve-review,
//! wait and subscribe. Each run is driven by its own task with its own
//! cancellation token and review inbox; the checkpoint store and the
//! broadcaster are the only things runs share.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::controller::RunController;
use crate::checkpoint::{CheckpointStore, RunSummary};
use crate::domain::{ErrorKind, ErrorLogEntry, ReviewDecision, RunId, RunInput, RunState, RunStatus, Stage};
use crate::error::{Error, Result};
use crate::events::{ProgressBroadcaster, ProgressEvent, ProgressKind};
use crate::model_call::ModelCallWrapper;
use crate::skills::SkillProvider;
use crate::stages::{ReviewInbox, ReviewResponse, StageContext, StageRegistry, StageSettings};

struct RunHandle {
    cancel: CancellationToken,
    reviews: Arc<ReviewInbox>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<Result<RunState>>>>,
}

impl RunHandle {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Owns the runs of this process
pub struct RunManager {
    store: Arc<dyn CheckpointStore>,
    events: Arc<ProgressBroadcaster>,
    model: Arc<ModelCallWrapper>,
    skills: Arc<dyn SkillProvider>,
    settings: Arc<StageSettings>,
    registry: StageRegistry,
    /// Handles of runs still being driven; a finished run removes its own
    active: Arc<DashMap<RunId, Arc<RunHandle>>>,
}

impl RunManager {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        events: Arc<ProgressBroadcaster>,
        model: Arc<ModelCallWrapper>,
        skills: Arc<dyn SkillProvider>,
        settings: StageSettings,
    ) -> Self {
        Self {
            store,
            events,
            model,
            skills,
            settings: Arc::new(settings),
            registry: StageRegistry::standard(),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Replace the stage executors
    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn events(&self) -> &Arc<ProgressBroadcaster> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Receive every progress event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Validate the input, persist the initial state and start driving it
    pub async fn start(&self, input: RunInput) -> Result<RunId> {
        input.validate()?;
        let state = RunState::new(input);
        let run_id = state.run_id.clone();
        self.store.save(&state).await?;
        self.spawn(state, false);
        Ok(run_id)
    }

    /// Continue a stored run from its latest checkpoint
    ///
    /// Terminal runs are returned unchanged and not restarted.
    pub async fn resume(&self, run_id: &RunId) -> Result<RunState> {
        if let Some(handle) = self.handle(run_id) {
            if handle.is_running() {
                return Err(Error::RunAlreadyActive(run_id.to_string()));
            }
        }

        let mut state = self.load(run_id).await?;
        if state.is_terminal() {
            info!(run_id = %run_id, status = %state.status, "Run already finished, nothing to resume");
            return Ok(state);
        }

        state.status = RunStatus::Running;
        self.store.save(&state).await?;
        self.spawn(state.clone(), true);
        Ok(state)
    }

    /// Latest checkpointed snapshot of a run
    pub async fn status(&self, run_id: &RunId) -> Result<RunState> {
        self.load(run_id).await
    }

    pub async fn list(&self) -> Result<Vec<RunSummary>> {
        self.store.list().await
    }

    /// Request cancellation
    ///
    /// A run driven by this process stops at its next suspension point. A
    /// stored run that is not being driven is marked cancelled directly.
    pub async fn cancel(&self, run_id: &RunId) -> Result<()> {
        if let Some(handle) = self.handle(run_id) {
            if handle.is_running() {
                info!(run_id = %run_id, "Cancellation requested");
                handle.cancel.cancel();
                return Ok(());
            }
        }

        let mut state = self.load(run_id).await?;
        if state.is_terminal() {
            return Err(Error::RunAlreadyTerminal(run_id.to_string()));
        }
        let stage = state.last_completed.unwrap_or(Stage::Extract);
        state
            .errors
            .push(ErrorLogEntry::new(ErrorKind::Fatal, stage, "run cancelled"));
        state.status = RunStatus::Cancelled;
        state.pending_review = None;
        state.updated_at = chrono::Utc::now();
        self.store.save(&state).await?;
        self.events.emit(ProgressEvent::new(
            run_id.clone(),
            ProgressKind::RunFailed {
                reason: "cancelled".to_string(),
            },
        ));
        Ok(())
    }

    /// Deliver a decision to a run waiting in Review
    pub async fn resolve_review(
        &self,
        run_id: &RunId,
        decision: ReviewDecision,
        feedback: Option<String>,
    ) -> Result<()> {
        let Some(handle) = self.handle(run_id) else {
            // Distinguish unknown runs from runs that are not waiting
            self.load(run_id).await?;
            return Err(Error::NoPendingReview(run_id.to_string()));
        };

        let mut response = ReviewResponse::new(decision);
        if let Some(feedback) = feedback {
            response = response.with_feedback(feedback);
        }
        if handle.reviews.resolve(response) {
            info!(run_id = %run_id, %decision, "Review decision delivered");
            Ok(())
        } else {
            Err(Error::NoPendingReview(run_id.to_string()))
        }
    }

    /// Wait for a run driven by this process to finish
    ///
    /// Runs not driven here, or already finished, return their stored
    /// snapshot.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunState> {
        let task = match self.handle(run_id) {
            Some(handle) => handle.task.lock().await.take(),
            None => None,
        };
        let Some(task) = task else {
            return self.load(run_id).await;
        };

        task.await
            .map_err(|e| Error::Other(format!("run task for '{}' failed: {}", run_id, e)))?
    }

    /// Whether this process is currently driving the run
    pub fn is_active(&self, run_id: &RunId) -> bool {
        self.handle(run_id).is_some_and(|handle| handle.is_running())
    }

    /// Runs this process is driving or holding in review
    pub fn active_runs(&self) -> Vec<RunId> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    fn handle(&self, run_id: &RunId) -> Option<Arc<RunHandle>> {
        self.active.get(run_id).map(|entry| Arc::clone(entry.value()))
    }

    async fn load(&self, run_id: &RunId) -> Result<RunState> {
        self.store
            .load(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }

    fn spawn(&self, state: RunState, resumed: bool) {
        let run_id = state.run_id.clone();
        let cancel = CancellationToken::new();
        let reviews = Arc::new(ReviewInbox::new());

        let ctx = StageContext {
            model: Arc::clone(&self.model),
            skills: Arc::clone(&self.skills),
            reviews: Arc::clone(&reviews),
            cancel: cancel.clone(),
            settings: Arc::clone(&self.settings),
        };
        let controller = RunController::new(
            self.registry.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.events),
            ctx,
        );

        self.events.emit(ProgressEvent::new(
            run_id.clone(),
            ProgressKind::RunStarted {
                target_subsystem: state.input.target_subsystem.clone(),
                resumed,
            },
        ));
        info!(run_id = %run_id, resumed, subsystem = %state.input.target_subsystem, "Run started");

        let running = Arc::new(AtomicBool::new(true));
        let task_running = Arc::clone(&running);
        let task_run_id = run_id.clone();
        let task_active = Arc::clone(&self.active);
        let task = tokio::spawn(async move {
            let result = controller.drive(state).await;
            task_running.store(false, Ordering::SeqCst);
            release(&task_active, &task_run_id, &task_running);
            match &result {
                Ok(done) => info!(run_id = %task_run_id, status = %done.status, "Run task finished"),
                Err(e) => error!(run_id = %task_run_id, error = %e, "Run task aborted"),
            }
            result
        });

        let handle = Arc::new(RunHandle {
            cancel,
            reviews,
            running: Arc::clone(&running),
            task: Mutex::new(Some(task)),
        });
        if self.active.insert(run_id.clone(), handle).is_some() {
            warn!(run_id = %run_id, "Replaced a finished run handle");
        }
        // The task may have finished before its handle was registered
        if !running.load(Ordering::SeqCst) {
            release(&self.active, &run_id, &running);
        }
    }
}

/// Drop the handle of a finished run, unless a newer drive replaced it
fn release(active: &DashMap<RunId, Arc<RunHandle>>, run_id: &RunId, running: &Arc<AtomicBool>) {
    active.remove_if(run_id, |_, handle| Arc::ptr_eq(&handle.running, running));
}
