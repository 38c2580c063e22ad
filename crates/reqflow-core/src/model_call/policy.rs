//! Retry and model-preference policy

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Stage;

/// Exponential backoff for transient failures plus the per-call timeout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per model before a transient failure becomes terminal
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Bounded wait for a single call
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// No delays; handy for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Ordered model list for one stage: one primary, any number of fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChain {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl ModelChain {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Primary first, then fallbacks in order
    pub fn models(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        1 + self.fallbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Model chains per stage, with a default for stages without one
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPreferences {
    default: ModelChain,
    per_stage: HashMap<Stage, ModelChain>,
}

impl ModelPreferences {
    pub fn new(default: ModelChain) -> Self {
        Self {
            default,
            per_stage: HashMap::new(),
        }
    }

    pub fn with_stage(mut self, stage: Stage, chain: ModelChain) -> Self {
        self.per_stage.insert(stage, chain);
        self
    }

    pub fn chain_for(&self, stage: Stage) -> &ModelChain {
        self.per_stage.get(&stage).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(500));
        assert_eq!(policy.delay(10), Duration::from_millis(500));
    }

    #[test]
    fn test_chain_order() {
        let chain = ModelChain::new("a").with_fallbacks(vec!["b".to_string(), "c".to_string()]);
        assert_eq!(chain.models().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_stage_chain_falls_back_to_default() {
        let prefs = ModelPreferences::new(ModelChain::new("default"))
            .with_stage(Stage::Decompose, ModelChain::new("big"));
        assert_eq!(prefs.chain_for(Stage::Decompose).primary, "big");
        assert_eq!(prefs.chain_for(Stage::Extract).primary, "default");
    }
}
