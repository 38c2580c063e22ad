//! Document: terminal stage writing the run report

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{StageContext, StageError, StageExecutor, StageFailure};
use crate::domain::{
    AllocationSummary, ArtifactLocation, ErrorLogEntry, RequirementItem, ReviewRecord, RunId,
    RunOutcome, RunState, Stage, StagePatch, Strategy, StrategyVersion,
};
use crate::quality::QualityMetrics;
use crate::traceability::TraceabilityGraph;

/// Contents of `report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub source_ref: String,
    pub target_subsystem: String,
    pub outcome: RunOutcome,
    pub iterations: u32,
    pub system_context: Option<String>,
    pub strategy: Option<Strategy>,
    pub strategy_version: Option<StrategyVersion>,
    pub allocation: Option<AllocationSummary>,
    pub parents: Vec<RequirementItem>,
    pub items: Vec<RequirementItem>,
    pub traceability: Option<TraceabilityGraph>,
    pub quality: Option<QualityMetrics>,
    pub reviews: Vec<ReviewRecord>,
    pub errors: Vec<ErrorLogEntry>,
    pub fallback_uses: u32,
}

impl RunReport {
    pub fn from_state(state: &RunState, outcome: RunOutcome) -> Self {
        Self {
            run_id: state.run_id.clone(),
            generated_at: Utc::now(),
            source_ref: state.input.source_ref.clone(),
            target_subsystem: state.input.target_subsystem.clone(),
            outcome,
            iterations: state.iteration,
            system_context: state.system_context.clone(),
            strategy: state.strategy.clone(),
            strategy_version: state.strategy_version.clone(),
            allocation: state.allocation.clone(),
            parents: state.extracted.clone().unwrap_or_default(),
            items: state.decomposed.clone().unwrap_or_default(),
            traceability: state.traceability.clone(),
            quality: state.quality.clone(),
            reviews: state.reviews.clone(),
            errors: state.errors.clone(),
            fallback_uses: state.fallback_uses,
        }
    }
}

/// Outcome implied by the run's accumulated outputs
pub fn outcome_of(state: &RunState) -> RunOutcome {
    if state.extracted.as_ref().is_none_or(|items| items.is_empty()) {
        RunOutcome::NoRequirements
    } else if state
        .allocation
        .as_ref()
        .is_none_or(|a| a.allocated.is_empty())
    {
        RunOutcome::NoAllocation
    } else {
        RunOutcome::Decomposed
    }
}

/// Writes `<output_dir>/<run_id>/report.json`
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentStage;

#[async_trait]
impl StageExecutor for DocumentStage {
    fn stage(&self) -> Stage {
        Stage::Document
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StagePatch, StageFailure> {
        let outcome = outcome_of(state);
        let report = RunReport::from_state(state, outcome);

        let dir: PathBuf = ctx.settings.output_dir.join(state.run_id.as_str());
        let path = dir.join("report.json");
        let body = serde_json::to_vec_pretty(&report)
            .map_err(|e| StageError::Output(e.to_string()))?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StageError::Output(format!("{}: {}", dir.display(), e)))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| StageError::Output(format!("{}: {}", path.display(), e)))?;

        info!(run_id = %state.run_id, %outcome, path = %path.display(), "Report written");
        Ok(StagePatch::new().documented(
            outcome,
            vec![ArtifactLocation {
                name: "report".to_string(),
                path: path.display().to_string(),
            }],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RequirementType, RunInput};
    use crate::stages::test_support::{Replay, context};

    #[test]
    fn test_outcomes() {
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        state.extracted = Some(vec![]);
        assert_eq!(outcome_of(&state), RunOutcome::NoRequirements);

        state.extracted = Some(vec![RequirementItem::new("SYS-1", "a", RequirementType::Other)]);
        state.allocation = Some(AllocationSummary::default());
        assert_eq!(outcome_of(&state), RunOutcome::NoAllocation);

        state.allocation = Some(AllocationSummary {
            allocated: vec!["SYS-1".to_string()],
            excluded: vec![],
        });
        assert_eq!(outcome_of(&state), RunOutcome::Decomposed);
    }

    #[tokio::test]
    async fn test_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Replay::new(vec![]), dir.path().to_path_buf());
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        state.extracted = Some(vec![]);

        let patch = DocumentStage.execute(&state, &ctx).await.unwrap();
        assert_eq!(patch.outcome, Some(RunOutcome::NoRequirements));
        let artifacts = patch.artifacts.unwrap();
        let written = std::fs::read_to_string(&artifacts[0].path).unwrap();
        let report: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(report["outcome"], "no_requirements");
        assert_eq!(report["run_id"], state.run_id.as_str());
    }
}
