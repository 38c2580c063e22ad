//! Quality gate
//!
//! Pass requires both an overall score at or above the threshold and zero
//! critical issues. Either condition alone fails the gate.

use serde::{Deserialize, Serialize};

use super::{Issue, QualityMetrics};

/// Slack absorbing rounding in the weighted overall score
const SCORE_EPSILON: f64 = 1e-9;

fn meets(overall: f64, threshold: f64) -> bool {
    overall + SCORE_EPSILON >= threshold
}

/// Decision over one metrics record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub passed: bool,
    pub overall: f64,
    pub threshold: f64,
    /// Critical issues that block the gate regardless of score
    pub blocking: Vec<Issue>,
}

impl GateOutcome {
    pub fn score_ok(&self) -> bool {
        meets(self.overall, self.threshold)
    }
}

/// Pass/fail evaluator bound to a threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    threshold: f64,
}

impl QualityGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn evaluate(&self, metrics: &QualityMetrics) -> GateOutcome {
        let blocking: Vec<Issue> = metrics.critical_issues().cloned().collect();
        let passed = meets(metrics.overall, self.threshold) && blocking.is_empty();
        GateOutcome {
            passed,
            overall: metrics.overall,
            threshold: self.threshold,
            blocking,
        }
    }
}

/// Evaluate `metrics` against `threshold`
pub fn evaluate(metrics: &QualityMetrics, threshold: f64) -> GateOutcome {
    QualityGate::new(threshold).evaluate(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{Dimension, DimensionScores, Severity};

    fn metrics(overall: f64, issues: Vec<Issue>) -> QualityMetrics {
        QualityMetrics {
            scores: DimensionScores::uniform(overall, false),
            issues,
            overall,
        }
    }

    #[test]
    fn test_pass_requires_score_and_no_critical() {
        assert!(evaluate(&metrics(0.85, vec![]), 0.8).passed);
        assert!(!evaluate(&metrics(0.72, vec![]), 0.8).passed);
    }

    #[test]
    fn test_high_score_with_critical_issue_fails() {
        let outcome = evaluate(
            &metrics(
                0.99,
                vec![Issue::critical(Dimension::Traceability, "orphan child")],
            ),
            0.8,
        );
        assert!(!outcome.passed);
        assert!(outcome.score_ok());
        assert_eq!(outcome.blocking.len(), 1);
    }

    #[test]
    fn test_non_critical_issues_do_not_block() {
        let outcome = evaluate(
            &metrics(
                0.9,
                vec![
                    Issue::new(Severity::Major, Dimension::Clarity, "ambiguous"),
                    Issue::new(Severity::Minor, Dimension::Clarity, "wordy"),
                ],
            ),
            0.8,
        );
        assert!(outcome.passed);
        assert!(outcome.blocking.is_empty());
    }

    #[test]
    fn test_score_equal_to_threshold_passes() {
        assert!(evaluate(&metrics(0.8, vec![]), 0.8).passed);
        assert!(evaluate(&QualityMetrics::perfect(false), 1.0).passed);
    }

    #[test]
    fn test_weighted_mean_equal_to_threshold_passes() {
        let scores = DimensionScores {
            completeness: 1.0,
            clarity: 1.0,
            testability: 0.9,
            traceability: 0.7,
            domain_compliance: None,
        };
        let computed =
            QualityMetrics::compute(scores, vec![], &crate::quality::QualityWeights::default())
                .unwrap();
        let outcome = evaluate(&computed, 0.9);
        assert!(outcome.score_ok());
        assert!(outcome.passed);
        assert!(!evaluate(&metrics(0.8999, vec![]), 0.9).passed);
    }

    #[test]
    fn test_gate_is_exactly_the_conjunction() {
        let critical = || vec![Issue::critical(Dimension::Clarity, "x")];
        for score in [0.0, 0.5, 0.79, 0.8, 0.81, 1.0] {
            for issues in [vec![], critical()] {
                let has_critical = !issues.is_empty();
                let outcome = evaluate(&metrics(score, issues), 0.8);
                assert_eq!(outcome.passed, score >= 0.8 && !has_critical);
            }
        }
    }
}
