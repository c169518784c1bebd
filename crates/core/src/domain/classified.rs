// Error taxonomy for processing failures

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category assigned to a processing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    FileNotFound,
    PermissionDenied,
    ProcessingError,
    NetworkError,
    StorageError,
    ValidationError,
    ResourceError,
    SecurityError,
    RateLimitError,
    ConfigurationError,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::FileNotFound,
        ErrorCategory::PermissionDenied,
        ErrorCategory::ProcessingError,
        ErrorCategory::NetworkError,
        ErrorCategory::StorageError,
        ErrorCategory::ValidationError,
        ErrorCategory::ResourceError,
        ErrorCategory::SecurityError,
        ErrorCategory::RateLimitError,
        ErrorCategory::ConfigurationError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FileNotFound => "FILE_NOT_FOUND",
            ErrorCategory::PermissionDenied => "PERMISSION_DENIED",
            ErrorCategory::ProcessingError => "PROCESSING_ERROR",
            ErrorCategory::NetworkError => "NETWORK_ERROR",
            ErrorCategory::StorageError => "STORAGE_ERROR",
            ErrorCategory::ValidationError => "VALIDATION_ERROR",
            ErrorCategory::ResourceError => "RESOURCE_ERROR",
            ErrorCategory::SecurityError => "SECURITY_ERROR",
            ErrorCategory::RateLimitError => "RATE_LIMIT_ERROR",
            ErrorCategory::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    /// Transient categories eligible for automatic retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::NetworkError | ErrorCategory::RateLimitError | ErrorCategory::ResourceError
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized, caller-facing error.
///
/// `message` is what callers see (possibly a friendly rewrite), `technical`
/// keeps the (sanitized) raw failure text for operators and retry decisions.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    pub technical: String,
    pub context: String,
    pub retryable: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Sanitized `source()` chain of the raw error
    #[serde(default)]
    pub trace: Vec<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl ClassifiedError {
    pub fn new(
        category: ErrorCategory,
        message: impl Into<String>,
        context: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        let message = message.into();
        Self {
            category,
            technical: message.clone(),
            message,
            context: context.into(),
            retryable: category.is_retryable(),
            suggestions: Vec::new(),
            trace: Vec::new(),
            detail: None,
            timestamp,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Whether this error is a circuit-open / no-service rejection
    pub fn is_unavailable(&self) -> bool {
        self.detail
            .as_ref()
            .and_then(|d| d.get("unavailable"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
