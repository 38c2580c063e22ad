//! Run state
//!
//! The single record threaded through the pipeline. Stages never mutate it
//! directly; they return a [`StagePatch`](super::patch::StagePatch) that the
//! run controller merges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::requirement::RequirementItem;
use super::strategy::{Strategy, StrategyVersion};
use crate::error::{Error, Result};
use crate::quality::{Issue, QualityMetrics};
use crate::traceability::TraceabilityGraph;

/// Opaque run identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Analyze,
    Decompose,
    Validate,
    Review,
    Document,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Analyze => "analyze",
            Self::Decompose => "decompose",
            Self::Validate => "validate",
            Self::Review => "review",
            Self::Document => "document",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters a run is started with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    /// Where the source text came from (a path or other reference)
    pub source_ref: String,
    /// Source document text
    pub source_text: String,
    /// Subsystem the requirements are decomposed for
    pub target_subsystem: String,
    /// Quality gate threshold in [0, 1]
    pub quality_threshold: f64,
    /// Maximum number of Decompose iterations before forcing review
    pub max_iterations: u32,
    /// Pause for review between Analyze and Decompose
    pub review_before_decompose: bool,
    /// Whether a human can answer review requests
    pub interactive: bool,
}

impl RunInput {
    pub fn new(
        source_ref: impl Into<String>,
        source_text: impl Into<String>,
        target_subsystem: impl Into<String>,
    ) -> Self {
        Self {
            source_ref: source_ref.into(),
            source_text: source_text.into(),
            target_subsystem: target_subsystem.into(),
            quality_threshold: 0.8,
            max_iterations: 3,
            review_before_decompose: false,
            interactive: false,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_review_before_decompose(mut self, review: bool) -> Self {
        self.review_before_decompose = review;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(Error::InvalidInput(format!(
                "quality threshold {} is outside [0, 1]",
                self.quality_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidInput(
                "max iterations must be at least 1".to_string(),
            ));
        }
        if self.target_subsystem.trim().is_empty() {
            return Err(Error::InvalidInput(
                "target subsystem name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingReview,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingReview => "awaiting_review",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "awaiting_review" => Ok(Self::AwaitingReview),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidState(format!("unknown run status '{}'", other))),
        }
    }
}

/// Classified failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retry on the same model
    Transient,
    /// Switch to the next fallback model
    Content,
    /// Surface immediately
    Fatal,
    /// Strategy-adherence failure, always fatal at the pipeline level
    StructuralViolation,
}

impl ErrorKind {
    /// Whether this kind ends the run's normal progress
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Fatal | Self::StructuralViolation)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Content => write!(f, "content"),
            Self::Fatal => write!(f, "fatal"),
            Self::StructuralViolation => write!(f, "structural_violation"),
        }
    }
}

/// One entry of the run's ordered error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
    /// Structured detail (attempted model, attempt number, raw error...)
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ErrorLogEntry {
    pub fn new(kind: ErrorKind, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            stage,
            message: message.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// The unrecoverable-error flag, with the failure that raised it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

/// Why a run is waiting for a review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Optional pause after Analyze to inspect the strategy
    StrategyCheckpoint,
    /// The quality gate kept failing until the iteration limit
    GateExhausted,
    /// An unrecoverable error was raised
    Failure,
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrategyCheckpoint => write!(f, "strategy_checkpoint"),
            Self::GateExhausted => write!(f, "gate_exhausted"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// External review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Revise,
    Abandon,
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Revise => write!(f, "revise"),
            Self::Abandon => write!(f, "abandon"),
        }
    }
}

impl std::str::FromStr for ReviewDecision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "approve" | "a" => Ok(Self::Approve),
            "revise" | "r" => Ok(Self::Revise),
            "abandon" | "x" => Ok(Self::Abandon),
            other => Err(Error::InvalidInput(format!(
                "unknown review decision '{}' (expected approve, revise or abandon)",
                other
            ))),
        }
    }
}

/// A resolved review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub reason: ReviewReason,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub feedback: Option<String>,
    /// True when the decision was made automatically in a non-interactive run
    pub automatic: bool,
    pub decided_at: DateTime<Utc>,
    /// Failure under review, for reviews raised by an unrecoverable error
    #[serde(default)]
    pub resolved_failure: Option<RunFailure>,
}

/// How parent items were split by the allocation rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    /// Parent ids allocated to the target subsystem
    pub allocated: Vec<String>,
    /// Parent ids excluded, with the rule that excluded them (if any)
    pub excluded: Vec<(String, Option<String>)>,
}

/// Terminal outcome recorded by the Document stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Decomposed,
    NoAllocation,
    NoRequirements,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decomposed => write!(f, "decomposed"),
            Self::NoAllocation => write!(f, "no_allocation"),
            Self::NoRequirements => write!(f, "no_requirements"),
        }
    }
}

/// A produced artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub name: String,
    pub path: String,
}

/// Everything known about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub input: RunInput,

    // Stage outputs
    pub extracted: Option<Vec<RequirementItem>>,
    pub system_context: Option<String>,
    pub strategy: Option<Strategy>,
    pub strategy_version: Option<StrategyVersion>,
    pub allocation: Option<AllocationSummary>,
    pub decomposed: Option<Vec<RequirementItem>>,
    pub quality: Option<QualityMetrics>,
    pub traceability: Option<TraceabilityGraph>,
    pub feedback: Option<String>,
    pub outcome: Option<RunOutcome>,
    pub artifacts: Vec<ArtifactLocation>,

    // Control
    pub iteration: u32,
    /// Issues from the last failed gate, consumed by the next Decompose
    pub refinement_guidance: Vec<Issue>,
    pub human_review_required: bool,
    pub pending_review: Option<ReviewReason>,
    pub reviews: Vec<ReviewRecord>,
    pub last_completed: Option<Stage>,
    pub status: RunStatus,
    pub failure: Option<RunFailure>,
    pub errors: Vec<ErrorLogEntry>,
    pub fallback_uses: u32,
}

impl RunState {
    pub fn new(input: RunInput) -> Self {
        Self::with_id(RunId::new(), input)
    }

    pub fn with_id(run_id: RunId, input: RunInput) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            created_at: now,
            updated_at: now,
            input,
            extracted: None,
            system_context: None,
            strategy: None,
            strategy_version: None,
            allocation: None,
            decomposed: None,
            quality: None,
            traceability: None,
            feedback: None,
            outcome: None,
            artifacts: Vec::new(),
            iteration: 0,
            refinement_guidance: Vec::new(),
            human_review_required: false,
            pending_review: None,
            reviews: Vec::new(),
            last_completed: None,
            status: RunStatus::Running,
            failure: None,
            errors: Vec::new(),
            fallback_uses: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Parent items allocated to the target subsystem
    pub fn allocated_parents(&self) -> Vec<RequirementItem> {
        let (Some(extracted), Some(allocation)) = (&self.extracted, &self.allocation) else {
            return Vec::new();
        };
        extracted
            .iter()
            .filter(|item| allocation.allocated.contains(&item.id))
            .cloned()
            .collect()
    }

    /// Raise the unrecoverable-error flag and log the failure
    pub fn record_failure(&mut self, failure: RunFailure, errors: Vec<ErrorLogEntry>) {
        self.errors.extend(errors);
        self.failure = Some(failure);
        self.updated_at = Utc::now();
    }

    /// Latest review record
    pub fn last_review(&self) -> Option<&ReviewRecord> {
        self.reviews.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RequirementType;

    #[test]
    fn test_input_validation() {
        let input = RunInput::new("doc.txt", "text", "Navigation");
        assert!(input.validate().is_ok());
        assert!(input.clone().with_threshold(1.5).validate().is_err());
        assert!(input.clone().with_max_iterations(0).validate().is_err());
        assert!(RunInput::new("doc.txt", "text", " ").validate().is_err());
    }

    #[test]
    fn test_new_state_starts_at_zero() {
        let state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        assert_eq!(state.iteration, 0);
        assert_eq!(state.status, RunStatus::Running);
        assert!(state.last_completed.is_none());
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_allocated_parents_filters_by_allocation() {
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        state.extracted = Some(vec![
            RequirementItem::new("SYS-1", "a", RequirementType::Functional),
            RequirementItem::new("SYS-2", "b", RequirementType::Functional),
        ]);
        state.allocation = Some(AllocationSummary {
            allocated: vec!["SYS-2".to_string()],
            excluded: vec![("SYS-1".to_string(), None)],
        });
        let parents = state.allocated_parents();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, "SYS-2");
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RunStatus::Running,
            RunStatus::AwaitingReview,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_review_decision_parsing() {
        assert_eq!("Approve".parse::<ReviewDecision>().unwrap(), ReviewDecision::Approve);
        assert_eq!("r".parse::<ReviewDecision>().unwrap(), ReviewDecision::Revise);
        assert!("maybe".parse::<ReviewDecision>().is_err());
    }

    #[test]
    fn test_state_json_round_trip() {
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        state.errors.push(
            ErrorLogEntry::new(ErrorKind::Content, Stage::Extract, "bad json")
                .with_detail(serde_json::json!({"model": "m1", "attempt": 0})),
        );
        state.quality = Some(QualityMetrics::perfect(false));
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
