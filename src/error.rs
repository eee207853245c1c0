//! Error types for the aggregation engine
//!
//! Errors are classified by recoverability:
//! - Retryable: store transport failures, watcher hiccups
//! - NonRetryable: malformed config, invalid filter selections
//!
//! Absent data is never an error. Missing collections decode as empty
//! snapshots and unresolvable references are dropped silently.

use std::path::PathBuf;
use thiserror::Error;

/// Error types for store access and engine control
#[derive(Debug, Error)]
pub enum EngineError {
    // Retryable errors
    #[error("Store fetch failed for {path}: {message}")]
    FetchFailed { path: String, message: String },

    #[error("Store subscription failed for {path}: {message}")]
    SubscribeFailed { path: String, message: String },

    #[error("File watcher error: {0}")]
    WatchError(String),

    #[error("IO error: {0}")]
    IoError(String),

    // Non-retryable errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Data directory not found: {0}")]
    DataDirNotFound(PathBuf),

    #[error("Failed to parse {what}: {message}")]
    ParseError { what: String, message: String },

    #[error("Invalid location filter: max count {0} is not one of 10, 20, 30, 50, 100")]
    InvalidMaxCount(usize),

    #[error("Engine has been disposed")]
    Disposed,
}

impl EngineError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::FetchFailed { .. }
                | EngineError::SubscribeFailed { .. }
                | EngineError::WatchError(_)
                | EngineError::IoError(_)
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EngineError::FetchFailed { .. } => {
                "The next change notification will retry the fetch automatically."
            }
            EngineError::SubscribeFailed { .. } => "Restart the engine to re-register listeners.",
            EngineError::WatchError(_) => "Check that the data directory is still accessible.",
            EngineError::IoError(_) => "Check file permissions and disk space.",
            EngineError::ConfigurationError(_) => {
                "Check your configuration in ~/.taskpulse/config.json"
            }
            EngineError::DataDirNotFound(_) => {
                "Verify the data directory path in ~/.taskpulse/config.json"
            }
            EngineError::ParseError { .. } => "Check the file format is valid JSON.",
            EngineError::InvalidMaxCount(_) => "Pick a count of 10, 20, 30, 50 or 100.",
            EngineError::Disposed => "Start a new engine for this scope.",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::IoError(err.to_string())
    }
}

impl From<notify::Error> for EngineError {
    fn from(err: notify::Error) -> Self {
        EngineError::WatchError(err.to_string())
    }
}

/// Serializable error representation for consumers
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineErrorInfo {
    pub message: String,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

impl From<&EngineError> for EngineErrorInfo {
    fn from(err: &EngineError) -> Self {
        EngineErrorInfo {
            message: err.to_string(),
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
