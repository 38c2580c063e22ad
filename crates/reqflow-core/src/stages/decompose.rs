//! Decompose: allocated parents to child items
//!
//! Allocation is mechanical (first matching rule wins). Child generation is
//! one model call per allocated parent. Every generated child is checked
//! against the strategy immediately; any violation fails the stage as a
//! structural violation.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::parse::parse_json;
use super::{CallLedger, StageContext, StageError, StageExecutor, StageFailure};
use crate::domain::{
    Allocation, AllocationSummary, RequirementItem, RunState, Stage, StagePatch, Strategy,
};
use crate::model_call::{CallSpec, OutputError};
use crate::quality::Issue;
use crate::skills;

#[derive(Debug, Deserialize)]
struct DecompositionOutput {
    #[serde(default)]
    items: Vec<RequirementItem>,
}

fn parse_children(text: &str) -> Result<Vec<RequirementItem>, OutputError> {
    parse_json::<DecompositionOutput>(text).map(|output| output.items)
}

/// Split parent items by the strategy's ordered rules
pub fn allocate(strategy: &Strategy, parents: &[RequirementItem]) -> AllocationSummary {
    let mut summary = AllocationSummary::default();
    for parent in parents {
        match strategy.allocate(parent) {
            Allocation::Allocated { .. } => summary.allocated.push(parent.id.clone()),
            Allocation::Excluded { rule_id } => summary.excluded.push((parent.id.clone(), rule_id)),
        }
    }
    summary
}

/// Generates child items under the binding strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct DecomposeStage;

#[async_trait]
impl StageExecutor for DecomposeStage {
    fn stage(&self) -> Stage {
        Stage::Decompose
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StagePatch, StageFailure> {
        let (Some(strategy), Some(version)) = (&state.strategy, &state.strategy_version) else {
            return Err(StageError::Precondition("no strategy available".to_string()).into());
        };
        let parents = state.extracted.as_deref().unwrap_or_default();
        let subsystem = state.input.target_subsystem.trim();

        let allocation = allocate(strategy, parents);
        info!(
            run_id = %state.run_id,
            iteration = state.iteration,
            allocated = allocation.allocated.len(),
            excluded = allocation.excluded.len(),
            "Allocated parent requirements"
        );

        let mut ledger = CallLedger::new();
        let mut children: Vec<RequirementItem> = Vec::new();

        let allocated: Vec<&RequirementItem> = parents
            .iter()
            .filter(|p| allocation.allocated.contains(&p.id))
            .collect();

        if !allocated.is_empty() {
            let spec = ctx
                .spec(Stage::Decompose, "decompose", skills::DECOMPOSITION)
                .await?;

            for parent in &allocated {
                if ctx.cancel.is_cancelled() {
                    return Err(ledger.fail(StageError::Cancelled));
                }

                let previous: HashSet<&str> = state
                    .decomposed
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .filter(|c| c.parent_id.as_deref() == Some(parent.id.as_str()))
                    .map(|c| c.id.as_str())
                    .collect();
                let guidance: Vec<&Issue> = state
                    .refinement_guidance
                    .iter()
                    .filter(|issue| match issue.item_id.as_deref() {
                        None => true,
                        Some(id) => id == parent.id || previous.contains(id),
                    })
                    .collect();
                let taken: Vec<&str> = children.iter().map(|c| c.id.as_str()).collect();

                let payload = serde_json::json!({
                    "target_subsystem": subsystem,
                    "system_context": state.system_context,
                    "strategy": {
                        "naming_pattern": strategy.naming_pattern,
                        "max_depth": strategy.max_depth,
                        "acceptance_criteria_required": strategy.acceptance_criteria_required,
                    },
                    "parent": parent,
                    "taken_ids": taken,
                    "refinement_guidance": guidance,
                    "feedback": state.feedback,
                })
                .to_string();

                let call = CallSpec {
                    name: format!("decompose:{}", parent.id),
                    ..spec.clone()
                };
                let generated = ctx.call(&mut ledger, &call, &payload, parse_children).await?;
                debug!(parent = %parent.id, count = generated.len(), "Decomposed parent");

                children.extend(
                    generated
                        .into_iter()
                        .map(|child| child.with_strategy_version(version.clone())),
                );
            }
        }

        let parent_ids: HashSet<&str> = allocated.iter().map(|p| p.id.as_str()).collect();
        let violations: Vec<_> = children
            .iter()
            .flat_map(|child| strategy.check_adherence(child, &parent_ids, subsystem))
            .collect();
        if !violations.is_empty() {
            warn!(
                run_id = %state.run_id,
                violations = violations.len(),
                "Generated items violate the strategy"
            );
            return Err(ledger
                .fail(StageError::ContractViolation(violations))
                .with_allocation(allocation));
        }

        info!(run_id = %state.run_id, count = children.len(), "Decomposition complete");
        Ok(ledger.finish(StagePatch::new().decomposition(allocation, children)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AllocationRule, NamingPattern, RequirementType, RuleMatcher, RunInput, ViolationKind,
    };
    use crate::stages::test_support::{Replay, context};

    fn state() -> RunState {
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        state.extracted = Some(vec![
            RequirementItem::new("SYS-1", "Report position at 10 Hz", RequirementType::Performance),
            RequirementItem::new("SYS-2", "Paint the hull white", RequirementType::Constraint),
        ]);
        let strategy = Strategy::new(
            vec![AllocationRule::allocate(
                "R1",
                RuleMatcher {
                    keywords: vec!["position".to_string()],
                    ..Default::default()
                },
            )],
            NamingPattern::new("NAV-{nnn}"),
        );
        state.strategy_version = Some(strategy.version());
        state.strategy = Some(strategy);
        state
    }

    #[test]
    fn test_allocation_summary() {
        let s = state();
        let summary = allocate(s.strategy.as_ref().unwrap(), s.extracted.as_ref().unwrap());
        assert_eq!(summary.allocated, vec!["SYS-1".to_string()]);
        assert_eq!(summary.excluded, vec![("SYS-2".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_children_are_tagged_with_strategy_version() {
        let reply = r#"{"items": [{"id": "NAV-001", "text": "Report at 10 Hz", "type": "performance",
            "parent_id": "SYS-1", "subsystem": "Navigation"}]}"#;
        let dir = tempfile::tempdir().unwrap();
        let client = Replay::new(vec![reply]);
        let ctx = context(client.clone(), dir.path().to_path_buf());
        let s = state();
        let patch = DecomposeStage.execute(&s, &ctx).await.unwrap();
        let items = patch.decomposed.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].strategy_version, s.strategy_version);
        // Only the allocated parent was sent to the model
        assert_eq!(client.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_naming_violation_is_structural() {
        let reply = r#"{"items": [{"id": "NAVIGATION-1", "text": "x", "type": "performance",
            "parent_id": "SYS-1", "subsystem": "Navigation"}]}"#;
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Replay::new(vec![reply]), dir.path().to_path_buf());
        let failure = DecomposeStage.execute(&state(), &ctx).await.unwrap_err();
        let allocation = failure.allocation.as_ref().unwrap();
        assert_eq!(allocation.allocated, vec!["SYS-1".to_string()]);
        match failure.error {
            StageError::ContractViolation(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].kind, ViolationKind::NamingPattern);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_allocated_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let client = Replay::new(vec![]);
        let ctx = context(client.clone(), dir.path().to_path_buf());
        let mut s = state();
        s.extracted = Some(vec![RequirementItem::new(
            "SYS-9",
            "Unrelated",
            RequirementType::Other,
        )]);
        let patch = DecomposeStage.execute(&s, &ctx).await.unwrap();
        assert_eq!(patch.decomposed, Some(vec![]));
        assert!(patch.allocation.unwrap().allocated.is_empty());
        assert!(client.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requires_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Replay::new(vec![]), dir.path().to_path_buf());
        let mut s = state();
        s.strategy = None;
        let failure = DecomposeStage.execute(&s, &ctx).await.unwrap_err();
        assert!(matches!(failure.error, StageError::Precondition(_)));
    }
}
