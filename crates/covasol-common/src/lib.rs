//! # Covasol Common
//!
//! Shared error type, logging setup, and retry helpers used by every crate of
//! the Covasol offline worker.
//!
//! ## Features
//!
//! - Unified error type with categories for log fields
//! - Logging configuration and subscriber setup
//! - Retry with backoff and timeout races

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the offline worker.
#[derive(Error, Debug)]
pub enum CovasolError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Cache lookups and writes.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Persistent storage errors.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Worker lifecycle errors.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Cancelled operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CovasolError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error with source.
    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle(message.into())
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CovasolError::Network { .. } | CovasolError::Timeout(_) | CovasolError::Io(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            CovasolError::Network { .. } => "network",
            CovasolError::Cache { .. } => "cache",
            CovasolError::Config { .. } => "config",
            CovasolError::Storage { .. } => "storage",
            CovasolError::Lifecycle(_) => "lifecycle",
            CovasolError::Io(_) => "io",
            CovasolError::Timeout(_) => "timeout",
            CovasolError::Cancelled => "cancelled",
            CovasolError::NotFound(_) => "not_found",
            CovasolError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for Covasol operations.
pub type Result<T> = std::result::Result<T, CovasolError>;
