//! Shared error classification for sensorsrv crates
//!
//! Service crates define their own `thiserror` enums and implement
//! [`ServiceErrorTrait`] so that callers (console replies, logs, retry
//! decisions) can treat every error the same way.

use serde::{Deserialize, Serialize};

// ============================================================================
// ErrorCategory
// ============================================================================

/// Coarse error classification used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Network,
    Timeout,

    // Business logic layer
    Validation,
    NotFound,
    Permission,

    // Protocol/communication layer
    Protocol,
    Connection,

    // System level
    Internal,
}

// ============================================================================
// ServiceErrorTrait
// ============================================================================

/// Common behaviour for all service error enums
pub trait ServiceErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for replies, logs, monitoring)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Connection
        )
    }

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> u64 {
        match self.category() {
            ErrorCategory::Network => 1000,
            ErrorCategory::Timeout => 500,
            ErrorCategory::Connection => 1500,
            _ => 0,
        }
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal => Level::ERROR,
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::Connection
            | ErrorCategory::Protocol => Level::WARN,
            ErrorCategory::Validation | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }
}

// ============================================================================
// ErrorInfo - reply payload
// ============================================================================

/// Serializable error description for consumer-facing replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g. `SENSORSRV_CONFIG_ERROR`)
    pub code: String,
    /// Human-readable message
    pub message: String,
    pub category: ErrorCategory,
    pub retryable: bool,
}

impl ErrorInfo {
    /// Build from any service error
    pub fn from_error<E: ServiceErrorTrait>(err: &E) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            category: err.category(),
            retryable: err.is_retryable(),
        }
    }
}
