//! Model-call wrapper
//!
//! This module provides:
//! - The `CompletionClient` seam to the completion service
//! - Classification of provider failures into transient, content and fatal
//! - Retry with exponential backoff on the same model for transient failures
//! - Fallback to the next model in the stage's chain for content failures

mod classify;
mod policy;
mod wrapper;

use async_trait::async_trait;

use crate::llm::Message;

pub use classify::{OutputError, ProviderError, ProviderErrorCategory};
pub use policy::{ModelChain, ModelPreferences, RetryPolicy};
pub use wrapper::{
    AttemptOutcome, AttemptRecord, CallFailure, CallSpec, CallSuccess, ModelCallWrapper,
};

/// One structured completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Upper bound on generated tokens
    pub max_output: usize,
}

/// Completion text plus token metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Completion {
    pub fn new(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Completion service client
///
/// Implementations report failures with a category so the wrapper can
/// classify them deterministically.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;
}
