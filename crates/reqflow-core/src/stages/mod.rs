//! Stage executors
//!
//! Each stage reads the current run snapshot and returns a [`StagePatch`];
//! none of them mutates the run state. Failures carry the call log gathered
//! before the failure so the controller can append it to the error log.

pub mod analyze;
pub mod decompose;
pub mod document;
pub mod extract;
pub mod parse;
pub mod review;
pub mod validate;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    AllocationSummary, ContractViolation, ErrorKind, ErrorLogEntry, RunFailure, RunState, Stage,
    StagePatch,
};
use crate::model_call::{CallFailure, CallSpec, CallSuccess, ModelCallWrapper, OutputError};
use crate::quality::QualityWeights;
use crate::skills::SkillProvider;

pub use analyze::AnalyzeStage;
pub use decompose::DecomposeStage;
pub use document::{DocumentStage, RunReport};
pub use extract::ExtractStage;
pub use review::{ReviewInbox, ReviewResponse, ReviewStage};
pub use validate::ValidateStage;

/// Why a stage did not produce a patch
#[derive(Debug, Error)]
pub enum StageError {
    /// Required input missing or unusable; never retried
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Generated items broke the binding strategy
    #[error("strategy contract violated: {}", summarize(.0))]
    ContractViolation(Vec<ContractViolation>),

    #[error("model call failed: {0}")]
    ModelCall(CallFailure),

    #[error("failed to write artifacts: {0}")]
    Output(String),

    #[error("run cancelled")]
    Cancelled,
}

fn summarize(violations: &[ContractViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) | Self::Output(_) | Self::Cancelled => ErrorKind::Fatal,
            Self::ContractViolation(_) => ErrorKind::StructuralViolation,
            Self::ModelCall(failure) => failure.kind,
        }
    }
}

impl From<CallFailure> for StageError {
    fn from(failure: CallFailure) -> Self {
        if failure.cancelled {
            Self::Cancelled
        } else {
            Self::ModelCall(failure)
        }
    }
}

/// A stage failure plus the call log gathered before it
#[derive(Debug)]
pub struct StageFailure {
    pub error: StageError,
    pub errors: Vec<ErrorLogEntry>,
    pub fallback_uses: u32,
    /// Allocation already decided when the failure happened
    pub allocation: Option<AllocationSummary>,
}

impl StageFailure {
    pub fn new(error: StageError) -> Self {
        Self {
            error,
            errors: Vec::new(),
            fallback_uses: 0,
            allocation: None,
        }
    }

    pub fn with_allocation(mut self, allocation: AllocationSummary) -> Self {
        self.allocation = Some(allocation);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, StageError::Cancelled)
    }

    /// Failure flag and complete log entries for the stage that failed
    pub fn into_record(self, stage: Stage) -> (RunFailure, Vec<ErrorLogEntry>, u32) {
        let kind = self.error.kind();
        let message = self.error.to_string();
        let mut errors = self.errors;
        let mut fallback_uses = self.fallback_uses;

        match &self.error {
            StageError::ModelCall(failure) => {
                errors.extend(failure.log_entries());
                fallback_uses += failure.fallback_uses;
            }
            StageError::ContractViolation(violations) => errors.push(
                ErrorLogEntry::new(kind, stage, message.clone()).with_detail(
                    serde_json::to_value(violations).unwrap_or(serde_json::Value::Null),
                ),
            ),
            _ => errors.push(ErrorLogEntry::new(kind, stage, message.clone())),
        }

        (
            RunFailure {
                stage,
                kind,
                message,
            },
            errors,
            fallback_uses,
        )
    }
}

impl From<StageError> for StageFailure {
    fn from(error: StageError) -> Self {
        Self::new(error)
    }
}

/// Log entries and fallback count of the calls made by one stage execution
#[derive(Debug, Default)]
pub struct CallLedger {
    errors: Vec<ErrorLogEntry>,
    fallback_uses: u32,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn record<T>(&mut self, success: CallSuccess<T>) -> T {
        self.errors.extend(success.log_entries());
        self.fallback_uses += success.fallback_uses;
        success.value
    }

    /// Attach the ledger to a stage error
    pub fn fail(&mut self, error: StageError) -> StageFailure {
        StageFailure {
            error,
            errors: std::mem::take(&mut self.errors),
            fallback_uses: std::mem::take(&mut self.fallback_uses),
            allocation: None,
        }
    }

    /// Attach the ledger to a finished patch
    pub fn finish(self, patch: StagePatch) -> StagePatch {
        patch.with_call_log(self.errors, self.fallback_uses)
    }
}

/// Settings the stages read besides the run state
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub output_dir: PathBuf,
    pub weights: QualityWeights,
    pub domain_compliance: bool,
    pub max_output: usize,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reqflow-output"),
            weights: QualityWeights::default(),
            domain_compliance: false,
            max_output: 4096,
        }
    }
}

/// Collaborators available to a stage execution
#[derive(Clone)]
pub struct StageContext {
    pub model: Arc<ModelCallWrapper>,
    pub skills: Arc<dyn SkillProvider>,
    pub reviews: Arc<ReviewInbox>,
    pub cancel: CancellationToken,
    pub settings: Arc<StageSettings>,
}

impl StageContext {
    /// Load a methodology text, treating a missing one as a precondition failure
    pub async fn skill(&self, name: &str) -> Result<Arc<str>, StageError> {
        self.skills
            .load(name)
            .await
            .map_err(|e| StageError::Precondition(e.to_string()))
    }

    /// Build a call spec for `stage` with the given skill as system prompt
    pub async fn spec(
        &self,
        stage: Stage,
        name: impl Into<String>,
        skill: &str,
    ) -> Result<CallSpec, StageError> {
        let system = self.skill(skill).await?;
        Ok(CallSpec::new(stage, name, &*system).with_max_output(self.settings.max_output))
    }

    /// Invoke the model-call wrapper and record the result in `ledger`
    pub async fn call<T, F>(
        &self,
        ledger: &mut CallLedger,
        spec: &CallSpec,
        payload: &str,
        parse: F,
    ) -> Result<T, StageFailure>
    where
        T: Send,
        F: Fn(&str) -> Result<T, OutputError> + Send + Sync,
    {
        match self.model.invoke(spec, payload, &self.cancel, parse).await {
            Ok(success) => Ok(ledger.record(success)),
            Err(failure) => Err(ledger.fail(failure.into())),
        }
    }
}

/// One pipeline stage
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, state: &RunState, ctx: &StageContext)
    -> Result<StagePatch, StageFailure>;
}

/// Executors by stage
#[derive(Clone)]
pub struct StageRegistry {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl StageRegistry {
    /// The six standard stages
    pub fn standard() -> Self {
        Self {
            executors: HashMap::new(),
        }
        .with(Arc::new(ExtractStage))
        .with(Arc::new(AnalyzeStage))
        .with(Arc::new(DecomposeStage))
        .with(Arc::new(ValidateStage))
        .with(Arc::new(ReviewStage))
        .with(Arc::new(DocumentStage))
    }

    /// Replace the executor for its stage
    pub fn with(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(executor.stage(), executor);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
