//! Stage patches
//!
//! A stage returns a `StagePatch` describing only the fields it produced.
//! The run controller merges it into the previous snapshot.

use chrono::Utc;

use super::requirement::RequirementItem;
use super::run_state::{
    AllocationSummary, ArtifactLocation, ErrorLogEntry, ReviewDecision, ReviewReason,
    ReviewRecord, RunOutcome, RunState, Stage,
};
use super::strategy::Strategy;
use crate::error::{Error, Result};
use crate::quality::QualityMetrics;
use crate::traceability::TraceabilityGraph;

/// Fields produced by one stage execution
#[derive(Debug, Clone, Default)]
pub struct StagePatch {
    pub extracted: Option<Vec<RequirementItem>>,
    pub system_context: Option<String>,
    pub strategy: Option<Strategy>,
    pub allocation: Option<AllocationSummary>,
    pub decomposed: Option<Vec<RequirementItem>>,
    pub quality: Option<QualityMetrics>,
    pub traceability: Option<TraceabilityGraph>,
    pub review: Option<ReviewRecord>,
    pub outcome: Option<RunOutcome>,
    pub artifacts: Option<Vec<ArtifactLocation>>,
    /// Log entries for deviations from the primary model
    pub errors: Vec<ErrorLogEntry>,
    pub fallback_uses: u32,
}

impl StagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extracted(mut self, items: Vec<RequirementItem>) -> Self {
        self.extracted = Some(items);
        self
    }

    pub fn analysis(mut self, system_context: impl Into<String>, strategy: Strategy) -> Self {
        self.system_context = Some(system_context.into());
        self.strategy = Some(strategy);
        self
    }

    pub fn decomposition(mut self, allocation: AllocationSummary, items: Vec<RequirementItem>) -> Self {
        self.allocation = Some(allocation);
        self.decomposed = Some(items);
        self
    }

    pub fn validation(mut self, quality: QualityMetrics, traceability: TraceabilityGraph) -> Self {
        self.quality = Some(quality);
        self.traceability = Some(traceability);
        self
    }

    pub fn review(mut self, record: ReviewRecord) -> Self {
        self.review = Some(record);
        self
    }

    pub fn documented(mut self, outcome: RunOutcome, artifacts: Vec<ArtifactLocation>) -> Self {
        self.outcome = Some(outcome);
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_call_log(mut self, errors: Vec<ErrorLogEntry>, fallback_uses: u32) -> Self {
        self.errors.extend(errors);
        self.fallback_uses += fallback_uses;
        self
    }
}

impl RunState {
    /// Merge the patch produced by `stage` into this snapshot
    ///
    /// Fails if the patch would replace an existing strategy.
    pub fn merge(mut self, stage: Stage, patch: StagePatch) -> Result<RunState> {
        if let Some(strategy) = patch.strategy {
            if self.strategy.is_some() {
                return Err(Error::StrategyOverwrite(self.run_id.to_string()));
            }
            self.strategy_version = Some(strategy.version());
            self.strategy = Some(strategy);
        }

        if let Some(items) = patch.extracted {
            self.extracted = Some(items);
        }
        if let Some(context) = patch.system_context {
            self.system_context = Some(context);
        }
        if let Some(allocation) = patch.allocation {
            self.allocation = Some(allocation);
        }
        if let Some(items) = patch.decomposed {
            self.decomposed = Some(items);
            self.refinement_guidance.clear();
        }
        if let Some(quality) = patch.quality {
            self.quality = Some(quality);
        }
        if let Some(graph) = patch.traceability {
            self.traceability = Some(graph);
        }
        if let Some(mut record) = patch.review {
            if let Some(feedback) = &record.feedback {
                self.feedback = Some(feedback.clone());
            }
            if record.reason == ReviewReason::Failure {
                record.resolved_failure = self.failure.clone();
                if record.decision != ReviewDecision::Abandon {
                    self.failure = None;
                }
            }
            self.pending_review = None;
            self.reviews.push(record);
        }
        if let Some(outcome) = patch.outcome {
            self.outcome = Some(outcome);
        }
        if let Some(artifacts) = patch.artifacts {
            self.artifacts = artifacts;
        }

        self.errors.extend(patch.errors);
        self.fallback_uses += patch.fallback_uses;
        self.last_completed = Some(stage);
        self.updated_at = Utc::now();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AllocationRule, ErrorKind, NamingPattern, RequirementType, RuleMatcher, RunFailure,
        RunInput,
    };

    fn state() -> RunState {
        RunState::new(RunInput::new("doc.txt", "text", "Navigation"))
    }

    fn strategy(pattern: &str) -> Strategy {
        Strategy::new(
            vec![AllocationRule::allocate("R1", RuleMatcher::default())],
            NamingPattern::new(pattern),
        )
    }

    #[test]
    fn test_merge_sets_strategy_and_version() {
        let s = strategy("NAV-{nnn}");
        let expected = s.version();
        let merged = state()
            .merge(Stage::Analyze, StagePatch::new().analysis("ctx", s))
            .unwrap();
        assert_eq!(merged.strategy_version, Some(expected));
        assert_eq!(merged.system_context.as_deref(), Some("ctx"));
        assert_eq!(merged.last_completed, Some(Stage::Analyze));
    }

    #[test]
    fn test_strategy_is_never_overwritten() {
        let merged = state()
            .merge(Stage::Analyze, StagePatch::new().analysis("ctx", strategy("A-{n}")))
            .unwrap();
        let err = merged
            .merge(Stage::Analyze, StagePatch::new().analysis("ctx", strategy("B-{n}")))
            .unwrap_err();
        assert!(matches!(err, Error::StrategyOverwrite(_)));
    }

    #[test]
    fn test_merge_leaves_untouched_fields_alone() {
        let items = vec![RequirementItem::new("SYS-1", "a", RequirementType::Functional)];
        let merged = state()
            .merge(Stage::Extract, StagePatch::new().extracted(items.clone()))
            .unwrap()
            .merge(Stage::Analyze, StagePatch::new().analysis("ctx", strategy("A-{n}")))
            .unwrap();
        assert_eq!(merged.extracted, Some(items));
        assert!(merged.decomposed.is_none());
    }

    #[test]
    fn test_decompose_consumes_guidance() {
        let mut s = state();
        s.refinement_guidance.push(crate::quality::Issue::critical(
            crate::quality::Dimension::Clarity,
            "vague",
        ));
        let merged = s
            .merge(
                Stage::Decompose,
                StagePatch::new().decomposition(AllocationSummary::default(), vec![]),
            )
            .unwrap();
        assert!(merged.refinement_guidance.is_empty());
        assert_eq!(merged.decomposed, Some(vec![]));
    }

    #[test]
    fn test_review_clears_failure_unless_abandoned() {
        let failed = || {
            let mut s = state();
            s.pending_review = Some(ReviewReason::Failure);
            s.record_failure(
                RunFailure {
                    stage: Stage::Decompose,
                    kind: ErrorKind::StructuralViolation,
                    message: "bad id".to_string(),
                },
                vec![],
            );
            s
        };
        let record = |decision| ReviewRecord {
            reason: ReviewReason::Failure,
            decision,
            feedback: Some("fix ids".to_string()),
            automatic: false,
            decided_at: Utc::now(),
            resolved_failure: None,
        };

        let revised = failed()
            .merge(Stage::Review, StagePatch::new().review(record(ReviewDecision::Revise)))
            .unwrap();
        assert!(revised.failure.is_none());
        assert!(revised.pending_review.is_none());
        assert_eq!(revised.feedback.as_deref(), Some("fix ids"));
        let resolved = revised.last_review().unwrap().resolved_failure.as_ref().unwrap();
        assert_eq!(resolved.message, "bad id");

        let abandoned = failed()
            .merge(Stage::Review, StagePatch::new().review(record(ReviewDecision::Abandon)))
            .unwrap();
        assert!(abandoned.failure.is_some());
        assert_eq!(abandoned.reviews.len(), 1);
    }

    #[test]
    fn test_call_log_is_appended() {
        let entry = ErrorLogEntry::new(ErrorKind::Transient, Stage::Extract, "rate limited");
        let merged = state()
            .merge(
                Stage::Extract,
                StagePatch::new()
                    .extracted(vec![])
                    .with_call_log(vec![entry.clone()], 1),
            )
            .unwrap();
        assert_eq!(merged.errors, vec![entry]);
        assert_eq!(merged.fallback_uses, 1);
    }
}
