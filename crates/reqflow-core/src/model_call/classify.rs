//! Provider error classification
//!
//! Every provider failure carries a category. Categories map onto the three
//! call-level kinds by a fixed table, never by inspecting message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ErrorKind;

/// Failure category reported by the completion service client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCategory {
    RateLimited,
    Timeout,
    Transport,
    ServerError,
    MalformedOutput,
    SchemaViolation,
    ContextLengthExceeded,
    Unauthorized,
    PermissionDenied,
    NotFound,
    PaymentRequired,
    InvalidRequest,
}

impl ProviderErrorCategory {
    /// Call-level kind for this category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited | Self::Timeout | Self::Transport | Self::ServerError => {
                ErrorKind::Transient
            }
            Self::MalformedOutput | Self::SchemaViolation | Self::ContextLengthExceeded => {
                ErrorKind::Content
            }
            Self::Unauthorized
            | Self::PermissionDenied
            | Self::NotFound
            | Self::PaymentRequired
            | Self::InvalidRequest => ErrorKind::Fatal,
        }
    }

    /// Category for an HTTP error status
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            413 => Self::ContextLengthExceeded,
            422 => Self::SchemaViolation,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::InvalidRequest,
        }
    }
}

impl std::fmt::Display for ProviderErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::ServerError => "server_error",
            Self::MalformedOutput => "malformed_output",
            Self::SchemaViolation => "schema_violation",
            Self::ContextLengthExceeded => "context_length_exceeded",
            Self::Unauthorized => "unauthorized",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::PaymentRequired => "payment_required",
            Self::InvalidRequest => "invalid_request",
        };
        write!(f, "{}", name)
    }
}

/// Error returned by a completion client
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{category}: {message}")]
pub struct ProviderError {
    pub category: ProviderErrorCategory,
    pub message: String,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(category: ProviderErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            status: None,
        }
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            category: ProviderErrorCategory::from_status(status),
            message: body.into(),
            status: Some(status),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.category.kind()
    }
}

/// Output that could not be turned into the expected structure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutputError {
    #[error("output is not valid JSON: {0}")]
    Malformed(String),
    #[error("output does not match the expected schema: {0}")]
    Schema(String),
}

impl From<OutputError> for ProviderError {
    fn from(err: OutputError) -> Self {
        let category = match err {
            OutputError::Malformed(_) => ProviderErrorCategory::MalformedOutput,
            OutputError::Schema(_) => ProviderErrorCategory::SchemaViolation,
        };
        ProviderError::new(category, err.to_string())
    }
}
