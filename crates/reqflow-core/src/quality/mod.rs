//! Quality metrics for decomposed requirements
//!
//! - `QualityMetrics`: per-dimension scores, issues and the weighted overall score
//! - `gate`: the pass/fail decision over a metrics record
//! - `checks`: mechanical structural checks run by the Validate stage

pub mod checks;
pub mod gate;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use checks::structural_issues;
pub use gate::{GateOutcome, QualityGate};

/// Severity of a quality issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

/// Quality dimension an issue or score belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Completeness,
    Clarity,
    Testability,
    Traceability,
    DomainCompliance,
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completeness => write!(f, "completeness"),
            Self::Clarity => write!(f, "clarity"),
            Self::Testability => write!(f, "testability"),
            Self::Traceability => write!(f, "traceability"),
            Self::DomainCompliance => write!(f, "domain_compliance"),
        }
    }
}

/// A single quality finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub dimension: Dimension,
    /// Item the issue is about, if any
    #[serde(default)]
    pub item_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

impl Issue {
    pub fn new(severity: Severity, dimension: Dimension, description: impl Into<String>) -> Self {
        Self {
            severity,
            dimension,
            item_id: None,
            description: description.into(),
            suggestion: String::new(),
        }
    }

    pub fn critical(dimension: Dimension, description: impl Into<String>) -> Self {
        Self::new(Severity::Critical, dimension, description)
    }

    pub fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Scores in [0, 1] for each dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub completeness: f64,
    pub clarity: f64,
    pub testability: f64,
    pub traceability: f64,
    /// Present only when domain compliance is an active dimension
    #[serde(default)]
    pub domain_compliance: Option<f64>,
}

impl DimensionScores {
    pub fn uniform(score: f64, domain_compliance: bool) -> Self {
        Self {
            completeness: score,
            clarity: score,
            testability: score,
            traceability: score,
            domain_compliance: domain_compliance.then_some(score),
        }
    }

    fn active(&self) -> Vec<(Dimension, f64)> {
        let mut active = vec![
            (Dimension::Completeness, self.completeness),
            (Dimension::Clarity, self.clarity),
            (Dimension::Testability, self.testability),
            (Dimension::Traceability, self.traceability),
        ];
        if let Some(score) = self.domain_compliance {
            active.push((Dimension::DomainCompliance, score));
        }
        active
    }
}

/// Errors building a metrics record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QualityError {
    #[error("score for {0} is {1}, expected a value in [0, 1]")]
    ScoreOutOfRange(Dimension, f64),
    #[error("weights sum to {0}, expected 1.0 across active dimensions")]
    WeightSum(f64),
    #[error("weight for {0} is negative")]
    NegativeWeight(Dimension),
}

/// Per-dimension weights for the overall score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub completeness: f64,
    pub clarity: f64,
    pub testability: f64,
    pub traceability: f64,
    pub domain_compliance: f64,
}

impl QualityWeights {
    /// Equal weights over the active dimensions
    pub fn equal(domain_compliance: bool) -> Self {
        if domain_compliance {
            Self {
                completeness: 0.2,
                clarity: 0.2,
                testability: 0.2,
                traceability: 0.2,
                domain_compliance: 0.2,
            }
        } else {
            Self {
                completeness: 0.25,
                clarity: 0.25,
                testability: 0.25,
                traceability: 0.25,
                domain_compliance: 0.0,
            }
        }
    }

    fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Completeness => self.completeness,
            Dimension::Clarity => self.clarity,
            Dimension::Testability => self.testability,
            Dimension::Traceability => self.traceability,
            Dimension::DomainCompliance => self.domain_compliance,
        }
    }

    /// Check the weights of the active dimensions sum to 1.0
    pub fn validate(&self, domain_compliance: bool) -> Result<(), QualityError> {
        let mut dimensions = vec![
            Dimension::Completeness,
            Dimension::Clarity,
            Dimension::Testability,
            Dimension::Traceability,
        ];
        if domain_compliance {
            dimensions.push(Dimension::DomainCompliance);
        }
        if let Some(d) = dimensions.iter().find(|d| self.weight(**d) < 0.0) {
            return Err(QualityError::NegativeWeight(*d));
        }
        let sum: f64 = dimensions.iter().map(|d| self.weight(*d)).sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(QualityError::WeightSum(sum));
        }
        Ok(())
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self::equal(false)
    }
}

/// Combined quality record produced by the Validate stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub scores: DimensionScores,
    pub issues: Vec<Issue>,
    /// Weighted mean of the active dimensions
    pub overall: f64,
}

impl QualityMetrics {
    /// Build a metrics record, deriving the overall score from the weights
    pub fn compute(
        scores: DimensionScores,
        issues: Vec<Issue>,
        weights: &QualityWeights,
    ) -> Result<Self, QualityError> {
        let active = scores.active();
        for (dimension, score) in &active {
            if !(0.0..=1.0).contains(score) {
                return Err(QualityError::ScoreOutOfRange(*dimension, *score));
            }
        }
        weights.validate(scores.domain_compliance.is_some())?;

        let overall = active
            .iter()
            .map(|(dimension, score)| weights.weight(*dimension) * score)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        Ok(Self {
            scores,
            issues,
            overall,
        })
    }

    /// Record used when there is nothing to validate
    pub fn perfect(domain_compliance: bool) -> Self {
        Self {
            scores: DimensionScores::uniform(1.0, domain_compliance),
            issues: Vec::new(),
            overall: 1.0,
        }
    }

    pub fn critical_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_critical())
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_weights_give_arithmetic_mean() {
        let scores = DimensionScores {
            completeness: 0.8,
            clarity: 0.6,
            testability: 1.0,
            traceability: 0.4,
            domain_compliance: None,
        };
        let metrics = QualityMetrics::compute(scores, vec![], &QualityWeights::default()).unwrap();
        assert!((metrics.overall - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_domain_compliance_dimension_is_weighted() {
        let scores = DimensionScores {
            domain_compliance: Some(0.0),
            ..DimensionScores::uniform(1.0, false)
        };
        let metrics =
            QualityMetrics::compute(scores, vec![], &QualityWeights::equal(true)).unwrap();
        assert!((metrics.overall - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_custom_weights() {
        let weights = QualityWeights {
            completeness: 0.4,
            clarity: 0.1,
            testability: 0.4,
            traceability: 0.1,
            domain_compliance: 0.0,
        };
        let scores = DimensionScores {
            completeness: 1.0,
            clarity: 0.0,
            testability: 0.5,
            traceability: 0.0,
            domain_compliance: None,
        };
        let metrics = QualityMetrics::compute(scores, vec![], &weights).unwrap();
        assert!((metrics.overall - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let weights = QualityWeights {
            completeness: 0.5,
            ..QualityWeights::default()
        };
        assert!(matches!(
            weights.validate(false),
            Err(QualityError::WeightSum(_))
        ));
        // Equal five-way weights do not sum to 1.0 over four dimensions
        assert!(QualityWeights::equal(true).validate(false).is_err());
    }

    #[test]
    fn test_out_of_range_score_is_rejected() {
        let scores = DimensionScores {
            clarity: 1.2,
            ..DimensionScores::uniform(0.5, false)
        };
        assert_eq!(
            QualityMetrics::compute(scores, vec![], &QualityWeights::default()),
            Err(QualityError::ScoreOutOfRange(Dimension::Clarity, 1.2))
        );
    }

    #[test]
    fn test_perfect_metrics() {
        let metrics = QualityMetrics::perfect(true);
        assert_eq!(metrics.overall, 1.0);
        assert!(metrics.issues.is_empty());
        assert_eq!(metrics.scores.domain_compliance, Some(1.0));
    }

    #[test]
    fn test_issue_counts() {
        let metrics = QualityMetrics {
            scores: DimensionScores::uniform(0.9, false),
            issues: vec![
                Issue::critical(Dimension::Traceability, "orphan"),
                Issue::new(Severity::Minor, Dimension::Clarity, "wordy"),
            ],
            overall: 0.9,
        };
        assert_eq!(metrics.count(Severity::Critical), 1);
        assert_eq!(metrics.critical_issues().count(), 1);
        assert_eq!(metrics.count(Severity::Major), 0);
    }
}
