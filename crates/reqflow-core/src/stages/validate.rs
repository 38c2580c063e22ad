//! Validate: structural checks plus semantic scoring
//!
//! An empty child list short-circuits to a perfect record without calling
//! the model.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::parse::parse_json;
use super::{CallLedger, StageContext, StageError, StageExecutor, StageFailure};
use crate::domain::{RunState, Stage, StagePatch};
use crate::model_call::OutputError;
use crate::quality::{DimensionScores, Issue, QualityMetrics, structural_issues};
use crate::skills;
use crate::traceability::TraceabilityGraph;

#[derive(Debug, Deserialize)]
struct SemanticReview {
    scores: DimensionScores,
    #[serde(default)]
    issues: Vec<Issue>,
}

fn parse_review(text: &str, domain_compliance: bool) -> Result<SemanticReview, OutputError> {
    let review: SemanticReview = parse_json(text)?;
    let s = &review.scores;
    let mut scores = vec![s.completeness, s.clarity, s.testability, s.traceability];
    match (domain_compliance, s.domain_compliance) {
        (true, Some(score)) => scores.push(score),
        (true, None) => {
            return Err(OutputError::Schema("domain_compliance score missing".to_string()));
        }
        (false, _) => {}
    }
    if let Some(bad) = scores.iter().find(|v| !(0.0..=1.0).contains(*v)) {
        return Err(OutputError::Schema(format!("score {} outside [0, 1]", bad)));
    }
    Ok(review)
}

/// Produces quality metrics and the traceability graph
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateStage;

#[async_trait]
impl StageExecutor for ValidateStage {
    fn stage(&self) -> Stage {
        Stage::Validate
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StagePatch, StageFailure> {
        let (Some(strategy), Some(version)) = (&state.strategy, &state.strategy_version) else {
            return Err(StageError::Precondition("no strategy available".to_string()).into());
        };
        let Some(children) = &state.decomposed else {
            return Err(StageError::Precondition("nothing has been decomposed".to_string()).into());
        };
        let parents = state.allocated_parents();
        let graph = TraceabilityGraph::build(&parents, children);
        let domain = ctx.settings.domain_compliance;

        if children.is_empty() {
            info!(run_id = %state.run_id, "No decomposed items, skipping validation");
            return Ok(StagePatch::new().validation(QualityMetrics::perfect(domain), graph));
        }

        let mut issues = structural_issues(children, &parents, strategy, version);

        let payload = serde_json::json!({
            "target_subsystem": state.input.target_subsystem,
            "domain_compliance": domain,
            "parents": parents,
            "items": children,
        })
        .to_string();

        let mut ledger = CallLedger::new();
        let spec = ctx.spec(Stage::Validate, "validate", skills::VALIDATION).await?;
        let review = ctx
            .call(&mut ledger, &spec, &payload, |text| parse_review(text, domain))
            .await?;

        let mut scores = review.scores;
        scores.traceability = scores.traceability.min(graph.resolution());
        if !domain {
            scores.domain_compliance = None;
        }
        issues.extend(review.issues);

        let metrics = match QualityMetrics::compute(scores, issues, &ctx.settings.weights) {
            Ok(metrics) => metrics,
            Err(e) => return Err(ledger.fail(StageError::Precondition(e.to_string()))),
        };

        info!(
            run_id = %state.run_id,
            iteration = state.iteration,
            score = metrics.overall,
            critical = metrics.critical_issues().count(),
            "Validation complete"
        );
        Ok(ledger.finish(StagePatch::new().validation(metrics, graph)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AllocationRule, AllocationSummary, NamingPattern, RequirementItem, RequirementType,
        RuleMatcher, RunInput, Strategy,
    };
    use crate::stages::test_support::{Replay, context};

    fn state(children: Vec<RequirementItem>) -> RunState {
        let mut state = RunState::new(RunInput::new("doc.txt", "text", "Navigation"));
        state.extracted = Some(vec![RequirementItem::new(
            "SYS-1",
            "Report position",
            RequirementType::Functional,
        )]);
        state.allocation = Some(AllocationSummary {
            allocated: vec!["SYS-1".to_string()],
            excluded: vec![],
        });
        let strategy = Strategy::new(
            vec![AllocationRule::allocate("R1", RuleMatcher::default())],
            NamingPattern::new("NAV-{nnn}"),
        );
        let version = strategy.version();
        state.decomposed = Some(
            children
                .into_iter()
                .map(|c| c.with_strategy_version(version.clone()))
                .collect(),
        );
        state.strategy_version = Some(version);
        state.strategy = Some(strategy);
        state
    }

    fn child(id: &str) -> RequirementItem {
        RequirementItem::child(id, "Report at 10 Hz", RequirementType::Performance, "SYS-1")
            .with_subsystem("Navigation")
    }

    const REVIEW: &str = r#"{"scores": {"completeness": 0.9, "clarity": 0.8, "testability": 0.7, "traceability": 1.0},
        "issues": [{"severity": "minor", "dimension": "clarity", "description": "wordy"}]}"#;

    #[tokio::test]
    async fn test_empty_list_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let client = Replay::new(vec![]);
        let ctx = context(client.clone(), dir.path().to_path_buf());
        let patch = ValidateStage.execute(&state(vec![]), &ctx).await.unwrap();
        let metrics = patch.quality.unwrap();
        assert_eq!(metrics.overall, 1.0);
        assert!(metrics.issues.is_empty());
        assert!(client.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_combines_structural_and_semantic() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Replay::new(vec![REVIEW]), dir.path().to_path_buf());
        let patch = ValidateStage
            .execute(&state(vec![child("NAV-001"), child("NAV-001")]), &ctx)
            .await
            .unwrap();
        let metrics = patch.quality.unwrap();
        assert!((metrics.overall - 0.85).abs() < 1e-9);
        assert_eq!(metrics.critical_issues().count(), 1);
        assert_eq!(metrics.issues.len(), 2);
        assert_eq!(patch.traceability.unwrap().links.len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_score_falls_back_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bad = r#"{"scores": {"completeness": 1.4, "clarity": 0.8, "testability": 0.7, "traceability": 1.0}}"#;
        let ctx = context(Replay::new(vec![bad]), dir.path().to_path_buf());
        let failure = ValidateStage
            .execute(&state(vec![child("NAV-001")]), &ctx)
            .await
            .unwrap_err();
        assert_eq!(failure.error.kind(), crate::domain::ErrorKind::Content);
    }

    #[test]
    fn test_domain_score_required_when_active() {
        assert!(parse_review(REVIEW, false).is_ok());
        assert!(matches!(parse_review(REVIEW, true), Err(OutputError::Schema(_))));
    }
}
