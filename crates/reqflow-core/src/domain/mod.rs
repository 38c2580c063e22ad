//! Domain layer
//!
//! Requirement items, the allocation strategy, the run state and the
//! patches stages return.

pub mod patch;
pub mod requirement;
pub mod run_state;
pub mod strategy;

pub use patch::StagePatch;
pub use requirement::{RequirementItem, RequirementType};
pub use run_state::{
    AllocationSummary, ArtifactLocation, ErrorKind, ErrorLogEntry, ReviewDecision, ReviewReason,
    ReviewRecord, RunFailure, RunId, RunInput, RunOutcome, RunState, RunStatus, Stage,
};
pub use strategy::{
    Allocation, AllocationDecision, AllocationRule, ContractViolation, NamingPattern,
    PatternError, RuleMatcher, Strategy, StrategyDefect, StrategyVersion, ViolationKind,
};
