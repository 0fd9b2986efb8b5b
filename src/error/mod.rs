//! Error types for tabrelay.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all tabrelay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Engine error ({engine}): {message}")]
    Engine { engine: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Frame error: {0}")]
    Frame(String),
}

impl RelayError {
    /// Create an engine error.
    pub fn engine(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a channel-unavailable error.
    pub fn channel_unavailable(message: impl Into<String>) -> Self {
        Self::ChannelUnavailable(message.into())
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::ChannelUnavailable(_) | Self::Io(_) => ErrorCategory::Channel,
            Self::Frame(_) | Self::Serialization(_) => ErrorCategory::Protocol,
            Self::ToolNotFound(_) | Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Upstream(_) => ErrorCategory::Upstream,
            Self::Engine { .. } => ErrorCategory::Engine,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::InvalidArgument(_) | Self::InvalidState(_) => ErrorCategory::Contract,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Timeout | ErrorCategory::Channel
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Channel => RecoverySuggestion::ReconnectPeer,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::NotFound => RecoverySuggestion::RefreshCatalog,
            ErrorCategory::Engine => RecoverySuggestion::CheckEngineInstallation,
            _ => RecoverySuggestion::ReportBug,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RelayError>;
