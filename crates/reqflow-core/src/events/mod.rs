//! Progress events
//!
//! Every run emits a stream of [`ProgressEvent`]s through a shared
//! [`ProgressBroadcaster`]. Subscribers see events in emission order from the
//! moment they subscribe; nothing emitted earlier is replayed.

pub mod jsonl;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{ArtifactLocation, ReviewReason, RunId, RunOutcome, Stage};

pub use jsonl::JsonlEventSink;

/// Default capacity of the broadcast channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Kind-specific payload of a progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressKind {
    RunStarted {
        target_subsystem: String,
        resumed: bool,
    },
    StageStarted {
        stage: Stage,
        iteration: u32,
    },
    StageCompleted {
        stage: Stage,
        iteration: u32,
        /// Overall quality score after Validate
        #[serde(default)]
        score: Option<f64>,
    },
    RunCompleted {
        outcome: Option<RunOutcome>,
        artifacts: Vec<ArtifactLocation>,
    },
    RunFailed {
        reason: String,
    },
    ReviewNeeded {
        reason: ReviewReason,
        #[serde(default)]
        score: Option<f64>,
    },
}

impl ProgressKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::ReviewNeeded { .. } => "review_needed",
        }
    }

    /// Whether no further events follow for the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunFailed { .. })
    }
}

/// One progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event_id: Uuid,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn new(run_id: RunId, kind: ProgressKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Fan-out of progress events to any number of subscribers
#[derive(Debug)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBroadcaster {
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self { sender }
    }

    /// Emit an event to current subscribers
    pub fn emit(&self, event: ProgressEvent) {
        debug!(run_id = %event.run_id, kind = event.kind.name(), "Progress event");

        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Stream the events of one run, ending after its terminal event
    pub fn subscribe_run(&self, run_id: RunId) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.run_id == run_id => {
                        let terminal = event.kind.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(run_id = %run_id, skipped, "Progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
