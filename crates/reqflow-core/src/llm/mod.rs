//! LLM integration - OpenRouter API
//!
//! This module provides:
//! - The OpenRouter HTTP client, implementing `CompletionClient`
//! - Request/response types matching the OpenAI-compatible API

mod client;
mod types;

pub use client::{API_KEY_ENV_VARS, LlmClient, LlmClientBuilder};
pub use types::{ChatRequest, ChatResponse, Choice, FinishReason, Message, MessageRole, Usage};
