//! Reqflow Core Library
//!
//! Decomposes a source document's requirements into child requirements for
//! one target subsystem, through a checkpointed, resumable pipeline:
//!
//! Extract → Analyze → Decompose ⇄ Validate → (Review) → Document
//!
//! - Stage executors (`stages`) return patches merged by the run controller
//! - Routing and run control (`pipeline`)
//! - Model calls with retry, timeout and fallback (`model_call`, `llm`)
//! - Quality gate and traceability (`quality`, `traceability`)
//! - Checkpoints (`checkpoint`, `storage`) and progress events (`events`)

pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod llm;
pub mod model_call;
pub mod pipeline;
pub mod quality;
pub mod skills;
pub mod source;
pub mod stages;
pub mod storage;
pub mod traceability;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
    pub use crate::config::Config;
    pub use crate::domain::{
        RequirementItem, RequirementType, ReviewDecision, RunId, RunInput, RunState, RunStatus,
        Stage,
    };
    pub use crate::error::{Error, Result};
    pub use crate::events::{ProgressBroadcaster, ProgressEvent, ProgressKind};
    pub use crate::model_call::{CompletionClient, ModelCallWrapper};
    pub use crate::pipeline::RunManager;
}
