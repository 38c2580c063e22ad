//! Error types for Reqflow

use thiserror::Error;

/// Result type alias using Reqflow's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Reqflow error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Run errors (E001-E099)
    #[error("Run '{0}' not found. Run `reqflow runs` to see all runs.")]
    RunNotFound(String),

    #[error("Run '{0}' has already finished.")]
    RunAlreadyTerminal(String),

    #[error("Run '{0}' is not waiting for a review decision.")]
    NoPendingReview(String),

    #[error("Run '{0}' is already active in this process.")]
    RunAlreadyActive(String),

    // Model call errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check that REQFLOW_API_KEY or OPENROUTER_API_KEY is set.")]
    LLMError(String),

    // State errors (E200-E299)
    #[error("Strategy already set for run '{0}'; a strategy is never overwritten.")]
    StrategyOverwrite(String),

    #[error("Invalid run state: {0}")]
    InvalidState(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Document extraction failed: {0}")]
    ExtractionFailed(String),

    // Skill errors (E900-E999)
    #[error("Skill '{0}' not found. Check `storage.skills_dir` in your configuration.")]
    SkillNotFound(String),

    // Generic errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::RunNotFound(_) => "E001",
            Self::RunAlreadyTerminal(_) => "E002",
            Self::NoPendingReview(_) => "E003",
            Self::RunAlreadyActive(_) => "E004",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::StrategyOverwrite(_) => "E200",
            Self::InvalidState(_) => "E201",
            Self::DatabaseError(_) => "E400",
            Self::CheckpointError(_) => "E401",
            Self::InvalidInput(_) => "E800",
            Self::ExtractionFailed(_) => "E801",
            Self::SkillNotFound(_) => "E900",
            Self::Serialization(_) => "E9998",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::RunNotFound(_) => Some("reqflow runs".to_string()),
            Self::RunAlreadyTerminal(id) => Some(format!("reqflow status {}", id)),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("export REQFLOW_API_KEY=<key>".to_string()),
            Self::SkillNotFound(_) => Some("reqflow config get storage.skills_dir".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_not_found_error() {
        let error = Error::RunNotFound("run-1".to_string());
        assert_eq!(error.code(), "E001");
        assert_eq!(error.suggestion(), Some("reqflow runs".to_string()));
        assert!(error.to_string().contains("run-1"));
    }

    #[test]
    fn test_run_already_terminal_suggests_status() {
        let error = Error::RunAlreadyTerminal("abc".to_string());
        assert_eq!(error.code(), "E002");
        assert_eq!(error.suggestion(), Some("reqflow status abc".to_string()));
    }

    #[test]
    fn test_strategy_overwrite_error() {
        let error = Error::StrategyOverwrite("run-9".to_string());
        assert_eq!(error.code(), "E200");
        assert_eq!(error.suggestion(), None);
        assert!(error.to_string().contains("never overwritten"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: Error = io.into();
        assert_eq!(error.code(), "E9999");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = parse.into();
        assert_eq!(error.code(), "E9998");
    }
}
