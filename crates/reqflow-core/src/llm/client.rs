//! OpenRouter completion client
//!
//! Sends chat completion requests to an OpenAI-compatible endpoint and
//! reports every failure with a provider error category. Retry and model
//! fallback live in the model-call wrapper, not here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::model_call::{
    Completion, CompletionClient, CompletionRequest, ProviderError, ProviderErrorCategory,
};

use super::types::{ChatRequest, ChatResponse, FinishReason};

/// Environment variables checked for the API key, in order
pub const API_KEY_ENV_VARS: [&str; 2] = ["REQFLOW_API_KEY", "OPENROUTER_API_KEY"];

/// OpenRouter LLM client
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.config.base_url)
            .field("default_model", &self.config.default_model)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the configured base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let mut config = self.config.unwrap_or_default();
        if let Some(url) = self.base_url {
            config.base_url = url;
        }
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::LLMError("API key is required".to_string()))?;

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            api_key,
        })
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new().config(config).api_key(api_key).build()
    }

    /// Create a client with the API key taken from the environment
    pub fn from_env(config: LlmConfig) -> Result<Self> {
        let api_key = API_KEY_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                Error::LLMError(format!(
                    "no API key found in {}",
                    API_KEY_ENV_VARS.join(" or ")
                ))
            })?;
        Self::new(config, api_key)
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn fallback_models(&self) -> &[String] {
        &self.config.fallback_models
    }

    async fn send(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Reqflow")
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        response.json::<ChatResponse>().await.map_err(|e| {
            ProviderError::new(
                ProviderErrorCategory::MalformedOutput,
                format!("failed to parse response: {}", e),
            )
        })
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let max_tokens = request.max_output.min(self.config.max_tokens);
        let chat = ChatRequest::new(request.model, request.messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(max_tokens)
            .json_object();

        let response = self.send(&chat).await?;
        completion_from_response(response)
    }
}

/// Turn a chat response into completion text
fn completion_from_response(
    response: ChatResponse,
) -> std::result::Result<Completion, ProviderError> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        ProviderError::new(ProviderErrorCategory::MalformedOutput, "response has no choices")
    })?;

    match choice.finish_reason {
        Some(FinishReason::Length) => {
            return Err(ProviderError::new(
                ProviderErrorCategory::MalformedOutput,
                "output truncated at the token limit",
            ));
        }
        Some(FinishReason::ContentFilter) => {
            return Err(ProviderError::new(
                ProviderErrorCategory::SchemaViolation,
                "output blocked by content filter",
            ));
        }
        _ => {}
    }

    if choice.message.content.trim().is_empty() {
        return Err(ProviderError::new(
            ProviderErrorCategory::MalformedOutput,
            "empty completion",
        ));
    }

    let usage = response.usage.as_ref();
    Ok(Completion {
        text: choice.message.content,
        model: response.model,
        input_tokens: usage.map(|u| u.prompt_tokens).unwrap_or(0),
        output_tokens: usage.map(|u| u.completion_tokens).unwrap_or(0),
    })
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    let category = if err.is_timeout() {
        ProviderErrorCategory::Timeout
    } else {
        ProviderErrorCategory::Transport
    };
    ProviderError::new(category, err.to_string())
}
