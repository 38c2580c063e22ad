//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{RunInput, Stage};
use crate::model_call::{ModelChain, ModelPreferences, RetryPolicy};
use crate::quality::QualityWeights;
use crate::stages::StageSettings;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "REQFLOW_CONFIG_DIR";

/// Reqflow configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub models: ModelsConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Only read so that a key stored in the file can be rejected
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: "anthropic/claude-sonnet-4-20250514".to_string(),
            fallback_models: vec![
                "anthropic/claude-3-5-haiku-latest".to_string(),
                "openai/gpt-4o".to_string(),
            ],
            temperature: 0.2,
            max_tokens: 8192,
            timeout_secs: 120,
            base_url: "https://openrouter.ai/api/v1".to_string(),
        }
    }
}

/// Per-stage model preference lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub extract: Option<ModelChain>,
    pub analyze: Option<ModelChain>,
    pub decompose: Option<ModelChain>,
    pub validate: Option<ModelChain>,
}

impl ModelsConfig {
    const STAGES: [Stage; 4] = [Stage::Extract, Stage::Analyze, Stage::Decompose, Stage::Validate];

    fn slot(&self, stage: Stage) -> Option<&Option<ModelChain>> {
        match stage {
            Stage::Extract => Some(&self.extract),
            Stage::Analyze => Some(&self.analyze),
            Stage::Decompose => Some(&self.decompose),
            Stage::Validate => Some(&self.validate),
            Stage::Review | Stage::Document => None,
        }
    }

    fn slot_mut(&mut self, stage: Stage) -> Option<&mut Option<ModelChain>> {
        match stage {
            Stage::Extract => Some(&mut self.extract),
            Stage::Analyze => Some(&mut self.analyze),
            Stage::Decompose => Some(&mut self.decompose),
            Stage::Validate => Some(&mut self.validate),
            Stage::Review | Stage::Document => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            call_timeout_secs: 120,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub review_before_decompose: bool,
    pub domain_compliance: bool,
    pub weights: QualityWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.8,
            max_iterations: 3,
            review_before_decompose: false,
            domain_compliance: false,
            weights: QualityWeights::equal(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite checkpoint database; defaults to `<config dir>/checkpoints.db`
    pub database_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub skills_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            output_dir: PathBuf::from("reqflow-output"),
            skills_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: crate::events::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(crate::llm::API_KEY_ENV_VARS
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.trim().is_empty())))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                let chars: Vec<char> = key.chars().collect();
                if chars.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix: String = chars[chars.len() - 4..].iter().collect();
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

/// Config directory: `$REQFLOW_CONFIG_DIR`, else `<platform config dir>/reqflow`
pub fn config_dir() -> PathBuf {
    if let Some(custom_dir) = env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(custom_dir);
    }
    dirs::config_dir()
        .map(|dir| dir.join("reqflow"))
        .unwrap_or_else(|| PathBuf::from(".reqflow"))
}

const KEYS: &[&str] = &[
    "llm.default_model",
    "llm.fallback_models",
    "llm.temperature",
    "llm.max_tokens",
    "llm.timeout_secs",
    "llm.base_url",
    "llm.api_key",
    "models.extract",
    "models.analyze",
    "models.decompose",
    "models.validate",
    "retry.max_attempts",
    "retry.base_delay_ms",
    "retry.multiplier",
    "retry.max_delay_ms",
    "retry.call_timeout_secs",
    "pipeline.quality_threshold",
    "pipeline.max_iterations",
    "pipeline.review_before_decompose",
    "pipeline.domain_compliance",
    "pipeline.weights",
    "storage.database_path",
    "storage.output_dir",
    "storage.skills_dir",
    "events.channel_capacity",
];

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn optional_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(default)".to_string())
}

fn stage_key(key: &str) -> Option<Stage> {
    match key {
        "models.extract" => Some(Stage::Extract),
        "models.analyze" => Some(Stage::Analyze),
        "models.decompose" => Some(Stage::Decompose),
        "models.validate" => Some(Stage::Validate),
        _ => None,
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        config_dir()
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Load configuration from the default location
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if self.llm.default_model.trim().is_empty() {
            return Err(anyhow!("llm.default_model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
        }
        if self.llm.max_tokens == 0 {
            return Err(anyhow!("llm.max_tokens must be at least 1"));
        }
        for stage in ModelsConfig::STAGES {
            if let Some(Some(chain)) = self.models.slot(stage) {
                if chain.primary.trim().is_empty() {
                    return Err(anyhow!("models.{} has an empty primary model", stage));
                }
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(anyhow!("retry.multiplier must be at least 1.0"));
        }
        if self.retry.call_timeout_secs == 0 {
            return Err(anyhow!("retry.call_timeout_secs must be at least 1"));
        }

        let pipeline = &self.pipeline;
        if !(0.0..=1.0).contains(&pipeline.quality_threshold) {
            return Err(anyhow!("Quality threshold must be between 0.0 and 1.0"));
        }
        if pipeline.max_iterations == 0 {
            return Err(anyhow!("pipeline.max_iterations must be at least 1"));
        }
        pipeline
            .weights
            .validate(pipeline.domain_compliance)
            .context("Invalid pipeline.weights")?;

        if self.events.channel_capacity == 0 {
            return Err(anyhow!("events.channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        if let Some(stage) = stage_key(key) {
            let chain = self.models.slot(stage).and_then(|c| c.as_ref());
            return Ok(match chain {
                Some(chain) => chain.models().collect::<Vec<_>>().join(", "),
                None => "(llm defaults)".to_string(),
            });
        }

        let w = &self.pipeline.weights;
        match key {
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),
            "llm.base_url" => Ok(self.llm.base_url.clone()),
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use REQFLOW_API_KEY or OPENROUTER_API_KEY env var)".to_string()),
            },

            "retry.max_attempts" => Ok(self.retry.max_attempts.to_string()),
            "retry.base_delay_ms" => Ok(self.retry.base_delay_ms.to_string()),
            "retry.multiplier" => Ok(self.retry.multiplier.to_string()),
            "retry.max_delay_ms" => Ok(self.retry.max_delay_ms.to_string()),
            "retry.call_timeout_secs" => Ok(self.retry.call_timeout_secs.to_string()),

            "pipeline.quality_threshold" => Ok(self.pipeline.quality_threshold.to_string()),
            "pipeline.max_iterations" => Ok(self.pipeline.max_iterations.to_string()),
            "pipeline.review_before_decompose" => {
                Ok(self.pipeline.review_before_decompose.to_string())
            }
            "pipeline.domain_compliance" => Ok(self.pipeline.domain_compliance.to_string()),
            "pipeline.weights" => Ok(format!(
                "{}, {}, {}, {}, {}",
                w.completeness, w.clarity, w.testability, w.traceability, w.domain_compliance
            )),

            "storage.database_path" => Ok(self.database_path().display().to_string()),
            "storage.output_dir" => Ok(self.storage.output_dir.display().to_string()),
            "storage.skills_dir" => Ok(display_path(&self.storage.skills_dir)),

            "events.channel_capacity" => Ok(self.events.channel_capacity.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `reqflow config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The whole configuration is validated after the change; on error it is
    /// left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        next.apply(key, value)?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if let Some(stage) = stage_key(key) {
            let mut models = split_list(value).into_iter();
            let chain = models
                .next()
                .map(|primary| ModelChain::new(primary).with_fallbacks(models.collect()));
            if let Some(slot) = self.models.slot_mut(stage) {
                *slot = chain;
            }
            return Ok(());
        }

        match key {
            "llm.default_model" => self.llm.default_model = value.trim().to_string(),
            "llm.fallback_models" => self.llm.fallback_models = split_list(value),
            "llm.temperature" => self.llm.temperature = parse(key, value)?,
            "llm.max_tokens" => self.llm.max_tokens = parse(key, value)?,
            "llm.timeout_secs" => self.llm.timeout_secs = parse(key, value)?,
            "llm.base_url" => self.llm.base_url = value.trim().to_string(),
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the REQFLOW_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            "retry.max_attempts" => self.retry.max_attempts = parse(key, value)?,
            "retry.base_delay_ms" => self.retry.base_delay_ms = parse(key, value)?,
            "retry.multiplier" => self.retry.multiplier = parse(key, value)?,
            "retry.max_delay_ms" => self.retry.max_delay_ms = parse(key, value)?,
            "retry.call_timeout_secs" => self.retry.call_timeout_secs = parse(key, value)?,

            "pipeline.quality_threshold" => self.pipeline.quality_threshold = parse(key, value)?,
            "pipeline.max_iterations" => self.pipeline.max_iterations = parse(key, value)?,
            "pipeline.review_before_decompose" => {
                self.pipeline.review_before_decompose = parse(key, value)?
            }
            "pipeline.domain_compliance" => {
                let enabled: bool = parse(key, value)?;
                if enabled != self.pipeline.domain_compliance {
                    self.pipeline.weights = QualityWeights::equal(enabled);
                }
                self.pipeline.domain_compliance = enabled;
            }
            "pipeline.weights" => {
                let weights = split_list(value)
                    .iter()
                    .map(|w| parse::<f64>(key, w))
                    .collect::<anyhow::Result<Vec<f64>>>()?;
                let (c, cl, t, tr, dc) = match weights.as_slice() {
                    [c, cl, t, tr] => (*c, *cl, *t, *tr, 0.0),
                    [c, cl, t, tr, dc] => (*c, *cl, *t, *tr, *dc),
                    _ => {
                        return Err(anyhow!(
                            "pipeline.weights takes 4 or 5 comma-separated numbers \
                             (completeness, clarity, testability, traceability[, domain_compliance])"
                        ));
                    }
                };
                self.pipeline.weights = QualityWeights {
                    completeness: c,
                    clarity: cl,
                    testability: t,
                    traceability: tr,
                    domain_compliance: dc,
                };
            }

            "storage.database_path" => self.storage.database_path = optional_path(value),
            "storage.output_dir" => {
                self.storage.output_dir = optional_path(value)
                    .ok_or_else(|| anyhow!("storage.output_dir must not be empty"))?
            }
            "storage.skills_dir" => self.storage.skills_dir = optional_path(value),

            "events.channel_capacity" => self.events.channel_capacity = parse(key, value)?,

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `reqflow config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path();
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }

    /// Checkpoint database location
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(crate::storage::default_database_path)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    /// Default chain from `llm`, overridden per stage by `models`
    pub fn model_preferences(&self) -> ModelPreferences {
        let default = ModelChain::new(self.llm.default_model.clone())
            .with_fallbacks(self.llm.fallback_models.clone());
        ModelsConfig::STAGES
            .into_iter()
            .fold(ModelPreferences::new(default), |prefs, stage| {
                match self.models.slot(stage).and_then(|c| c.clone()) {
                    Some(chain) => prefs.with_stage(stage, chain),
                    None => prefs,
                }
            })
    }

    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            output_dir: self.storage.output_dir.clone(),
            weights: self.pipeline.weights,
            domain_compliance: self.pipeline.domain_compliance,
            max_output: self.llm.max_tokens,
        }
    }

    /// Run input with the configured pipeline defaults
    pub fn run_input(
        &self,
        source_ref: impl Into<String>,
        source_text: impl Into<String>,
        target_subsystem: impl Into<String>,
    ) -> RunInput {
        RunInput::new(source_ref, source_text, target_subsystem)
            .with_threshold(self.pipeline.quality_threshold)
            .with_max_iterations(self.pipeline.max_iterations)
            .with_review_before_decompose(self.pipeline.review_before_decompose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.llm.fallback_models.len(), 2);
        assert_eq!(config.pipeline.quality_threshold, 0.8);
        assert_eq!(config.pipeline.max_iterations, 3);
        assert_eq!(
            config.events.channel_capacity,
            crate::events::DEFAULT_CHANNEL_CAPACITY
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.set("pipeline.quality_threshold", "0.9").unwrap();
        config.set("models.decompose", "m/primary, m/backup").unwrap();
        config.set("storage.skills_dir", "/opt/skills").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.get("models.decompose").unwrap(), "m/primary, m/backup");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[pipeline]\nmax_iterations = 5\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.pipeline.max_iterations, 5);
        assert_eq!(config.llm, LlmConfig::default());
    }

    #[test]
    fn test_api_key_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[llm]\napi_key = \"sk-secret\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        let mut config = Config::default();
        assert!(config.set("llm.api_key", "sk-secret").is_err());
    }

    #[test]
    fn test_api_key_is_never_written() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(!toml.contains("sk-secret"));
    }

    #[test]
    fn test_set_validates_and_leaves_config_unchanged_on_error() {
        let mut config = Config::default();
        assert!(config.set("pipeline.quality_threshold", "1.5").is_err());
        assert!(config.set("pipeline.max_iterations", "0").is_err());
        assert!(config.set("pipeline.weights", "0.5, 0.5, 0.5, 0.5").is_err());
        assert!(config.set("retry.max_attempts", "many").is_err());
        assert!(config.set("no.such.key", "1").is_err());
        assert_eq!(config, Config::default());

        config.set("pipeline.weights", "0.4, 0.2, 0.2, 0.2").unwrap();
        assert_eq!(config.pipeline.weights.completeness, 0.4);
    }

    #[test]
    fn test_domain_compliance_switches_weights() {
        let mut config = Config::default();
        config.set("pipeline.domain_compliance", "true").unwrap();
        assert_eq!(config.pipeline.weights, QualityWeights::equal(true));
        config.validate().unwrap();
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let list = config.list().unwrap();
        assert_eq!(list.len(), KEYS.len());
        assert!(list.iter().any(|(k, _)| k == "pipeline.weights"));
    }

    #[test]
    fn test_model_preferences_use_stage_overrides() {
        let mut config = Config::default();
        config.set("models.validate", "judge/model").unwrap();
        let prefs = config.model_preferences();
        assert_eq!(prefs.chain_for(Stage::Validate).primary, "judge/model");
        assert_eq!(
            prefs.chain_for(Stage::Extract).primary,
            config.llm.default_model
        );
        assert_eq!(prefs.chain_for(Stage::Extract).len(), 3);
    }

    #[test]
    fn test_clearing_stage_models() {
        let mut config = Config::default();
        config.set("models.analyze", "a/b").unwrap();
        config.set("models.analyze", "").unwrap();
        assert!(config.models.analyze.is_none());
    }

    #[test]
    fn test_retry_policy_and_run_input() {
        let mut config = Config::default();
        config.set("retry.base_delay_ms", "250").unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 3);

        config.set("pipeline.review_before_decompose", "true").unwrap();
        let input = config.run_input("doc.md", "text", "Navigation");
        assert!(input.review_before_decompose);
        assert_eq!(input.quality_threshold, 0.8);
    }
}
