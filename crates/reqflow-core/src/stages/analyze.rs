//! Analyze: parent items to system context and the allocation strategy

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::parse::parse_json;
use super::{CallLedger, StageContext, StageError, StageExecutor, StageFailure};
use crate::domain::{AllocationRule, NamingPattern, RunState, Stage, StagePatch, Strategy};
use crate::model_call::OutputError;
use crate::skills;

/// Strategy as the model returns it; missing fields are caught by `Strategy::validate`
#[derive(Debug, Deserialize)]
struct StrategyDraft {
    #[serde(default)]
    rules: Vec<AllocationRule>,
    #[serde(default)]
    naming_pattern: String,
    #[serde(default)]
    max_depth: Option<u8>,
    #[serde(default)]
    acceptance_criteria_required: bool,
}

#[derive(Debug, Deserialize)]
struct AnalysisOutput {
    #[serde(default)]
    system_context: String,
    strategy: StrategyDraft,
}

fn parse_analysis(text: &str) -> Result<AnalysisOutput, OutputError> {
    parse_json(text)
}

/// Produces the binding strategy for the target subsystem
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeStage;

#[async_trait]
impl StageExecutor for AnalyzeStage {
    fn stage(&self) -> Stage {
        Stage::Analyze
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StagePatch, StageFailure> {
        let parents = match &state.extracted {
            Some(items) if !items.is_empty() => items,
            _ => {
                return Err(
                    StageError::Precondition("no extracted requirements to analyse".to_string())
                        .into(),
                );
            }
        };
        let subsystem = state.input.target_subsystem.trim();
        if subsystem.is_empty() {
            return Err(StageError::Precondition("target subsystem name is empty".to_string()).into());
        }
        if state.strategy.is_some() {
            return Err(StageError::Precondition(
                "a strategy already exists for this run".to_string(),
            )
            .into());
        }

        let payload = serde_json::json!({
            "target_subsystem": subsystem,
            "requirements": parents,
        })
        .to_string();

        let mut ledger = CallLedger::new();
        let spec = ctx.spec(Stage::Analyze, "analyze", skills::ANALYSIS).await?;
        let output = ctx
            .call(&mut ledger, &spec, &payload, parse_analysis)
            .await?;

        let draft = output.strategy;
        let mut strategy = Strategy::new(draft.rules, NamingPattern::new(draft.naming_pattern))
            .with_acceptance_criteria_required(draft.acceptance_criteria_required);
        if let Some(depth) = draft.max_depth {
            strategy = strategy.with_max_depth(depth);
        }
        if let Err(defect) = strategy.validate() {
            return Err(ledger.fail(StageError::Precondition(format!(
                "unusable strategy: {}",
                defect
            ))));
        }

        info!(
            run_id = %state.run_id,
            rules = strategy.rules.len(),
            pattern = %strategy.naming_pattern,
            version = %strategy.version(),
            "Strategy produced"
        );
        Ok(ledger.finish(StagePatch::new().analysis(output.system_context, strategy)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RequirementItem, RequirementType, RunInput};
    use crate::stages::test_support::{Replay, context};

    fn state() -> RunState {
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        state.extracted = Some(vec![RequirementItem::new(
            "SYS-1",
            "The vehicle shall report its position",
            RequirementType::Functional,
        )]);
        state
    }

    const GOOD: &str = r#"{
        "system_context": "A rover",
        "strategy": {
            "rules": [{"id": "R1", "matcher": {"keywords": ["position"]}, "decision": "allocate"}],
            "naming_pattern": "NAV-{nnn}",
            "acceptance_criteria_required": true
        }
    }"#;

    #[tokio::test]
    async fn test_produces_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Replay::new(vec![GOOD]), dir.path().to_path_buf());
        let patch = AnalyzeStage.execute(&state(), &ctx).await.unwrap();
        let strategy = patch.strategy.unwrap();
        assert_eq!(strategy.rules.len(), 1);
        assert_eq!(strategy.max_depth, 1);
        assert!(strategy.acceptance_criteria_required);
        assert_eq!(patch.system_context.as_deref(), Some("A rover"));
    }

    #[tokio::test]
    async fn test_missing_rules_is_fatal_precondition() {
        let dir = tempfile::tempdir().unwrap();
        let reply = r#"{"system_context": "x", "strategy": {"naming_pattern": "NAV-{nnn}"}}"#;
        let ctx = context(Replay::new(vec![reply]), dir.path().to_path_buf());
        let failure = AnalyzeStage.execute(&state(), &ctx).await.unwrap_err();
        assert!(matches!(failure.error, StageError::Precondition(_)));
        assert_eq!(failure.error.kind(), crate::domain::ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_empty_pattern_is_fatal_precondition() {
        let dir = tempfile::tempdir().unwrap();
        let reply = r#"{"strategy": {"rules": [{"id": "R1", "decision": "allocate"}]}}"#;
        let ctx = context(Replay::new(vec![reply]), dir.path().to_path_buf());
        let failure = AnalyzeStage.execute(&state(), &ctx).await.unwrap_err();
        assert!(failure.error.to_string().contains("naming pattern"));
    }

    #[tokio::test]
    async fn test_requires_parent_items() {
        let dir = tempfile::tempdir().unwrap();
        let client = Replay::new(vec![GOOD]);
        let ctx = context(client.clone(), dir.path().to_path_buf());
        let mut s = state();
        s.extracted = Some(vec![]);
        let failure = AnalyzeStage.execute(&s, &ctx).await.unwrap_err();
        assert!(matches!(failure.error, StageError::Precondition(_)));
        assert!(client.payloads.lock().unwrap().is_empty());
    }
}
