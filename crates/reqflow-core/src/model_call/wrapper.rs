//! The model-call wrapper
//!
//! `invoke` runs one logical call through the stage's model chain:
//! transient failures retry on the same model with backoff, content failures
//! (including unparseable output) advance to the next fallback, fatal
//! failures return at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::{OutputError, ProviderError, ProviderErrorCategory};
use super::policy::{ModelPreferences, RetryPolicy};
use super::{CompletionClient, CompletionRequest};
use crate::domain::{ErrorKind, ErrorLogEntry, Stage};
use crate::llm::Message;

/// Description of one logical call
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub stage: Stage,
    /// Short label for logs, e.g. `decompose:SYS-4`
    pub name: String,
    /// System prompt (methodology text)
    pub system: String,
    pub max_output: usize,
}

impl CallSpec {
    pub fn new(stage: Stage, name: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            stage,
            name: name.into(),
            system: system.into(),
            max_output: 4096,
        }
    }

    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        kind: ErrorKind,
        category: ProviderErrorCategory,
        message: String,
    },
}

/// One attempt against one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub model: String,
    /// Position of the model in the chain (0 = primary)
    pub model_index: usize,
    /// Zero-based attempt on this model
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    fn to_log_entry(&self, stage: Stage, call: &str, kind: ErrorKind) -> ErrorLogEntry {
        let message = match &self.outcome {
            AttemptOutcome::Succeeded => format!("{} succeeded on {}", call, self.model),
            AttemptOutcome::Failed { message, .. } => {
                format!("{} failed on {}: {}", call, self.model, message)
            }
        };
        let detail = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        ErrorLogEntry::new(kind, stage, message).with_detail(detail)
    }
}

/// A successful call
#[derive(Debug, Clone)]
pub struct CallSuccess<T> {
    pub value: T,
    pub model: String,
    pub attempts: Vec<AttemptRecord>,
    pub fallback_uses: u32,
    call: String,
    stage: Stage,
}

impl<T> CallSuccess<T> {
    /// Whether the call succeeded on the primary model's first attempt
    pub fn is_clean(&self) -> bool {
        self.attempts.len() == 1
    }

    /// Log entries for every attempt, empty when the call was clean
    pub fn log_entries(&self) -> Vec<ErrorLogEntry> {
        if self.is_clean() {
            return Vec::new();
        }
        let mut kind = ErrorKind::Transient;
        self.attempts
            .iter()
            .map(|record| {
                if let AttemptOutcome::Failed { kind: k, .. } = &record.outcome {
                    kind = *k;
                }
                record.to_log_entry(self.stage, &self.call, kind)
            })
            .collect()
    }
}

/// A terminal call failure
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub call: String,
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
    pub fallback_uses: u32,
    /// The call stopped because the run was cancelled
    pub cancelled: bool,
}

impl CallFailure {
    /// Log entries for every attempt plus the terminal failure
    pub fn log_entries(&self) -> Vec<ErrorLogEntry> {
        let mut entries: Vec<ErrorLogEntry> = self
            .attempts
            .iter()
            .map(|record| {
                let kind = match &record.outcome {
                    AttemptOutcome::Failed { kind, .. } => *kind,
                    AttemptOutcome::Succeeded => self.kind,
                };
                record.to_log_entry(self.stage, &self.call, kind)
            })
            .collect();
        entries.push(
            ErrorLogEntry::new(self.kind, self.stage, self.message.clone()).with_detail(
                serde_json::json!({
                    "call": self.call,
                    "attempts": self.attempts.len(),
                    "fallback_uses": self.fallback_uses,
                    "cancelled": self.cancelled,
                }),
            ),
        );
        entries
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.call, self.kind, self.message)
    }
}

/// Runs logical calls through model chains with retry and fallback
pub struct ModelCallWrapper {
    client: Arc<dyn CompletionClient>,
    preferences: ModelPreferences,
    policy: RetryPolicy,
    fallback_counter: AtomicU64,
}

impl std::fmt::Debug for ModelCallWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCallWrapper")
            .field("policy", &self.policy)
            .field("fallback_uses", &self.fallback_uses())
            .finish()
    }
}

impl ModelCallWrapper {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        preferences: ModelPreferences,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            preferences,
            policy,
            fallback_counter: AtomicU64::new(0),
        }
    }

    /// Total fallback switches made through this wrapper
    pub fn fallback_uses(&self) -> u64 {
        self.fallback_counter.load(Ordering::Relaxed)
    }

    pub fn preferences(&self) -> &ModelPreferences {
        &self.preferences
    }

    /// Run one logical call, parsing the completion text with `parse`
    pub async fn invoke<T, F>(
        &self,
        spec: &CallSpec,
        payload: &str,
        cancel: &CancellationToken,
        parse: F,
    ) -> Result<CallSuccess<T>, CallFailure>
    where
        F: Fn(&str) -> Result<T, OutputError>,
    {
        let chain = self.preferences.chain_for(spec.stage);
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut fallback_uses = 0u32;

        let failure = |kind: ErrorKind,
                       message: String,
                       attempts: Vec<AttemptRecord>,
                       fallback_uses: u32,
                       cancelled: bool| CallFailure {
            kind,
            stage: spec.stage,
            call: spec.name.clone(),
            message,
            attempts,
            fallback_uses,
            cancelled,
        };

        for (model_index, model) in chain.models().enumerate() {
            if model_index > 0 {
                fallback_uses += 1;
                self.fallback_counter.fetch_add(1, Ordering::Relaxed);
                warn!(call = %spec.name, model = %model, "Switching to fallback model");
            }

            let mut attempt = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return Err(failure(
                        ErrorKind::Fatal,
                        "run cancelled".to_string(),
                        attempts,
                        fallback_uses,
                        true,
                    ));
                }

                debug!(call = %spec.name, model = %model, attempt, "Invoking model");
                let request = CompletionRequest {
                    model: model.to_string(),
                    messages: vec![Message::system(&spec.system), Message::user(payload)],
                    max_output: spec.max_output,
                };

                let result = match tokio::time::timeout(
                    self.policy.call_timeout,
                    self.client.complete(request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::new(
                        ProviderErrorCategory::Timeout,
                        format!("no response within {:?}", self.policy.call_timeout),
                    )),
                };

                let parsed = result.and_then(|completion| {
                    parse(&completion.text)
                        .map(|value| (value, completion.model))
                        .map_err(ProviderError::from)
                });

                match parsed {
                    Ok((value, _)) => {
                        attempts.push(AttemptRecord {
                            model: model.to_string(),
                            model_index,
                            attempt,
                            outcome: AttemptOutcome::Succeeded,
                        });
                        if attempts.len() > 1 {
                            info!(call = %spec.name, model = %model, attempts = attempts.len(), "Call recovered");
                        }
                        return Ok(CallSuccess {
                            value,
                            model: model.to_string(),
                            attempts,
                            fallback_uses,
                            call: spec.name.clone(),
                            stage: spec.stage,
                        });
                    }
                    Err(err) => {
                        let kind = err.kind();
                        attempts.push(AttemptRecord {
                            model: model.to_string(),
                            model_index,
                            attempt,
                            outcome: AttemptOutcome::Failed {
                                kind,
                                category: err.category,
                                message: err.message.clone(),
                            },
                        });

                        match kind {
                            ErrorKind::Transient => {
                                attempt += 1;
                                if attempt >= self.policy.max_attempts {
                                    warn!(call = %spec.name, model = %model, attempts = attempt, "Retry attempts exhausted");
                                    return Err(failure(
                                        ErrorKind::Transient,
                                        format!(
                                            "retry attempts exhausted on {}: {}",
                                            model, err
                                        ),
                                        attempts,
                                        fallback_uses,
                                        false,
                                    ));
                                }
                                let delay = self.policy.delay(attempt - 1);
                                warn!(
                                    call = %spec.name,
                                    model = %model,
                                    attempt,
                                    wait_ms = delay.as_millis() as u64,
                                    error = %err,
                                    "Transient failure, retrying after backoff"
                                );
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => {}
                                    _ = cancel.cancelled() => {}
                                }
                            }
                            ErrorKind::Content => {
                                warn!(call = %spec.name, model = %model, error = %err, "Content failure");
                                break;
                            }
                            ErrorKind::Fatal | ErrorKind::StructuralViolation => {
                                warn!(call = %spec.name, model = %model, error = %err, "Fatal failure");
                                return Err(failure(
                                    ErrorKind::Fatal,
                                    err.to_string(),
                                    attempts,
                                    fallback_uses,
                                    false,
                                ));
                            }
                        }
                    }
                }
            }
        }

        Err(failure(
            ErrorKind::Content,
            format!(
                "all {} configured models returned unusable output",
                chain.len()
            ),
            attempts,
            fallback_uses,
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::model_call::{Completion, ModelChain};

    type Reply = Result<String, ProviderError>;

    struct ScriptedClient {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn models_called(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
            self.calls.lock().unwrap().push(request.model.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::new(ProviderErrorCategory::NotFound, "script exhausted")));
            reply.map(|text| Completion::new(request.model, text))
        }
    }

    struct HangingClient;

    #[async_trait]
    impl CompletionClient for HangingClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Completion::new("m", "{}"))
        }
    }

    fn wrapper(client: Arc<dyn CompletionClient>, max_attempts: u32) -> ModelCallWrapper {
        let chain = ModelChain::new("primary")
            .with_fallbacks(vec!["fallback-1".to_string(), "fallback-2".to_string()]);
        ModelCallWrapper::new(
            client,
            ModelPreferences::new(chain),
            RetryPolicy::immediate(max_attempts),
        )
    }

    fn spec() -> CallSpec {
        CallSpec::new(Stage::Extract, "extract", "system")
    }

    fn parse_number(text: &str) -> Result<u32, OutputError> {
        text.trim()
            .parse()
            .map_err(|_| OutputError::Malformed(text.to_string()))
    }

    fn transient() -> Reply {
        Err(ProviderError::new(ProviderErrorCategory::RateLimited, "slow down"))
    }

    #[tokio::test]
    async fn test_clean_call_logs_nothing() {
        let client = ScriptedClient::new(vec![Ok("7".to_string())]);
        let w = wrapper(client.clone(), 3);
        let ok = w
            .invoke(&spec(), "payload", &CancellationToken::new(), parse_number)
            .await
            .unwrap();
        assert_eq!(ok.value, 7);
        assert!(ok.is_clean());
        assert!(ok.log_entries().is_empty());
        assert_eq!(ok.fallback_uses, 0);
    }

    #[tokio::test]
    async fn test_transient_retries_same_model() {
        let client = ScriptedClient::new(vec![transient(), transient(), Ok("1".to_string())]);
        let w = wrapper(client.clone(), 3);
        let ok = w
            .invoke(&spec(), "p", &CancellationToken::new(), parse_number)
            .await
            .unwrap();
        assert_eq!(client.models_called(), vec!["primary", "primary", "primary"]);
        assert_eq!(ok.fallback_uses, 0);
        let log = ok.log_entries();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|e| e.kind == ErrorKind::Transient));
    }

    #[tokio::test]
    async fn test_transient_exhaustion_is_terminal() {
        let client = ScriptedClient::new(vec![transient(), transient(), Ok("1".to_string())]);
        let w = wrapper(client.clone(), 2);
        let err = w
            .invoke(&spec(), "p", &CancellationToken::new(), parse_number)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert_eq!(client.models_called(), vec!["primary", "primary"]);
    }

    #[tokio::test]
    async fn test_content_failure_switches_to_fallback() {
        let client = ScriptedClient::new(vec![Ok("not a number".to_string()), Ok("5".to_string())]);
        let w = wrapper(client.clone(), 3);
        let ok = w
            .invoke(&spec(), "p", &CancellationToken::new(), parse_number)
            .await
            .unwrap();
        assert_eq!(ok.value, 5);
        assert_eq!(ok.model, "fallback-1");
        assert_eq!(ok.fallback_uses, 1);
        assert_eq!(client.models_called(), vec!["primary", "fallback-1"]);
        assert_eq!(ok.log_entries().len(), 2);
    }

    #[tokio::test]
    async fn test_all_fallbacks_exhausted() {
        let bad = || Ok("garbage".to_string());
        let client = ScriptedClient::new(vec![bad(), bad(), bad()]);
        let w = wrapper(client.clone(), 3);
        let err = w
            .invoke(&spec(), "p", &CancellationToken::new(), parse_number)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Content);
        assert_eq!(err.fallback_uses, 2);
        assert_eq!(w.fallback_uses(), 2);
        assert_eq!(err.attempts.len(), 3);
        // one entry per attempt plus the terminal failure
        assert_eq!(err.log_entries().len(), 4);
    }

    #[tokio::test]
    async fn test_fatal_surfaces_immediately() {
        let client = ScriptedClient::new(vec![
            Err(ProviderError::from_status(401, "bad key")),
            Ok("1".to_string()),
        ]);
        let w = wrapper(client.clone(), 3);
        let err = w
            .invoke(&spec(), "p", &CancellationToken::new(), parse_number)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Fatal);
        assert_eq!(err.fallback_uses, 0);
        assert_eq!(client.models_called(), vec!["primary"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let mut w = wrapper(Arc::new(HangingClient), 2);
        w.policy.call_timeout = Duration::from_millis(50);
        let err = w
            .invoke(&spec(), "p", &CancellationToken::new(), parse_number)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert!(err.attempts.iter().all(|a| matches!(
            a.outcome,
            AttemptOutcome::Failed {
                category: ProviderErrorCategory::Timeout,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let client = ScriptedClient::new(vec![Ok("1".to_string())]);
        let w = wrapper(client.clone(), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = w.invoke(&spec(), "p", &cancel, parse_number).await.unwrap_err();
        assert!(err.cancelled);
        assert!(client.models_called().is_empty());
    }
}
