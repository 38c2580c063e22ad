//! Review: human-in-the-loop decision point
//!
//! Interactive runs wait on the run's [`ReviewInbox`] for exactly one of
//! approve, revise or abandon. Non-interactive runs approve automatically
//! and the record says so.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{StageContext, StageError, StageExecutor, StageFailure};
use crate::domain::{ReviewDecision, ReviewRecord, RunState, Stage, StagePatch};

/// Decision delivered to a waiting review
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewResponse {
    pub decision: ReviewDecision,
    pub feedback: Option<String>,
}

impl ReviewResponse {
    pub fn new(decision: ReviewDecision) -> Self {
        Self {
            decision,
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        let feedback = feedback.into();
        self.feedback = (!feedback.trim().is_empty()).then_some(feedback);
        self
    }
}

#[derive(Debug, Default)]
struct Slot {
    sender: Option<oneshot::Sender<ReviewResponse>>,
    receiver: Option<oneshot::Receiver<ReviewResponse>>,
}

/// Single-slot mailbox for one run's review decision
#[derive(Debug, Default)]
pub struct ReviewInbox {
    slot: Mutex<Slot>,
}

impl ReviewInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the inbox for a new decision, dropping any stale one
    pub fn arm(&self) {
        let (sender, receiver) = oneshot::channel();
        if let Ok(mut slot) = self.slot.lock() {
            slot.sender = Some(sender);
            slot.receiver = Some(receiver);
        }
    }

    /// Whether a decision can currently be delivered
    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.sender.is_some())
            .unwrap_or(false)
    }

    /// Deliver a decision; returns false when no review is waiting
    pub fn resolve(&self, response: ReviewResponse) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.sender.take(),
            Err(_) => None,
        };
        sender.is_some_and(|tx| tx.send(response).is_ok())
    }

    /// Wait for a decision; `None` when cancelled or never armed
    pub async fn wait(&self, cancel: &CancellationToken) -> Option<ReviewResponse> {
        let receiver = self.slot.lock().ok().and_then(|mut slot| slot.receiver.take())?;
        tokio::select! {
            response = receiver => response.ok(),
            _ = cancel.cancelled() => None,
        }
    }
}

/// Resolves the pending review
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewStage;

#[async_trait]
impl StageExecutor for ReviewStage {
    fn stage(&self) -> Stage {
        Stage::Review
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StagePatch, StageFailure> {
        let Some(reason) = state.pending_review else {
            return Err(StageError::Precondition("no review was requested".to_string()).into());
        };

        if !state.input.interactive {
            info!(run_id = %state.run_id, %reason, "Non-interactive run, approving automatically");
            return Ok(StagePatch::new().review(ReviewRecord {
                reason,
                decision: ReviewDecision::Approve,
                feedback: None,
                automatic: true,
                decided_at: Utc::now(),
                resolved_failure: None,
            }));
        }

        info!(run_id = %state.run_id, %reason, "Waiting for review decision");
        let Some(response) = ctx.reviews.wait(&ctx.cancel).await else {
            warn!(run_id = %state.run_id, "Review wait ended without a decision");
            return Err(StageError::Cancelled.into());
        };

        info!(run_id = %state.run_id, decision = %response.decision, "Review resolved");
        Ok(StagePatch::new().review(ReviewRecord {
            reason,
            decision: response.decision,
            feedback: response.feedback,
            automatic: false,
            decided_at: Utc::now(),
            resolved_failure: None,
        }))
    }
}
