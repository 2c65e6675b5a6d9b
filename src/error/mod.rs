//! Error types for roci-stream.

pub mod unified;

pub use unified::{ErrorCategory, RetryReason};

use thiserror::Error;

/// Primary error type for all streaming operations.
#[derive(Error, Debug)]
pub enum RociError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Provider-supplied retry hint, already normalized to milliseconds.
        retry_after_ms: Option<u64>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Model tried to call unavailable tool '{tool_name}'. Available tools: {}", available.join(", "))]
    NoSuchTool {
        tool_name: String,
        available: Vec<String>,
    },

    #[error("Invalid input for tool {tool_name}: {message}")]
    InvalidToolInput { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Callback error: {0}")]
    Callback(String),

    #[error("Operation aborted")]
    Aborted,

    #[error("{message}")]
    RetryExhausted {
        message: String,
        reason: RetryReason,
        errors: Vec<RociError>,
    },
}

impl RociError {
    /// Create an API error without a retry hint.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Create an API error carrying a retry-after hint.
    pub fn api_with_retry_after(status: u16, message: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::Api {
            status,
            message: message.into(),
            retry_after_ms: Some(retry_after_ms),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) | Self::ConfigParse(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                408 | 409 | 429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::NoSuchTool { .. } | Self::InvalidToolInput { .. } => ErrorCategory::ToolInput,
            Self::Aborted => ErrorCategory::Aborted,
            Self::RetryExhausted { .. } => ErrorCategory::Retry,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Whether this error represents a cooperative abort rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Retry hint attached by the provider, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Api { retry_after_ms, .. } | Self::RateLimited { retry_after_ms } => {
                *retry_after_ms
            }
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RociError>;
