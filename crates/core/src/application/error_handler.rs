// Error Handler
// Classifies raw failures, feeds circuit breakers and decorates errors for callers

use crate::application::circuit_breaker::CircuitBreakerRegistry;
use crate::config::ErrorHandlingConfig;
use crate::domain::{ClassifiedError, ErrorCategory};
use crate::port::TimeProvider;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Ordered match rules over the lowercased error text, first match wins
const MESSAGE_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::FileNotFound,
        &["no such file", "file not found", "not found", "enoent", "does not exist"],
    ),
    (
        ErrorCategory::PermissionDenied,
        &[
            "permission denied",
            "access denied",
            "eacces",
            "eperm",
            "forbidden",
            "unauthorized",
            "not allowed",
        ],
    ),
    (
        ErrorCategory::SecurityError,
        &[
            "security",
            "malicious",
            "virus",
            "path traversal",
            "injection",
            "xss",
            "csrf",
        ],
    ),
    (
        ErrorCategory::RateLimitError,
        &["rate limit", "too many requests", "429", "quota", "throttl"],
    ),
    (
        ErrorCategory::NetworkError,
        &[
            "network",
            "timeout",
            "timed out",
            "econnreset",
            "econnrefused",
            "enotfound",
            "connection",
            "socket",
            "dns",
        ],
    ),
    (
        ErrorCategory::StorageError,
        &["storage", "bucket", "disk", "enospc", "no space", "upload", "download"],
    ),
    (
        ErrorCategory::ResourceError,
        &[
            "out of memory",
            "memory",
            "resource",
            "capacity",
            "overloaded",
            "exhausted",
            "unavailable",
        ],
    ),
    (
        ErrorCategory::ConfigurationError,
        &[
            "configuration",
            "config",
            "api key",
            "not configured",
            "environment variable",
        ],
    ),
    (
        ErrorCategory::ValidationError,
        &[
            "invalid",
            "validation",
            "malformed",
            "unsupported",
            "required",
            "too large",
            "exceeds",
        ],
    ),
];

/// Fallback hints taken from the operation context when the text is silent
const CONTEXT_RULES: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::StorageError, &["storage", "upload", "download"]),
    (ErrorCategory::NetworkError, &["network", "http", "api", "fetch"]),
    (ErrorCategory::ValidationError, &["validat"]),
    (ErrorCategory::ConfigurationError, &["config"]),
];

/// Redaction rules applied in order
const REDACTIONS: &[(&str, &str)] = &[
    (
        r"(?i)\b(api[_-]?key|access[_-]?key|secret|token|password|passwd|pwd|auth(?:orization)?|bearer)\s*[=:]\s*[^\s,;&]+",
        "$1=[REDACTED]",
    ),
    (r"\b[A-Za-z0-9]{32,}\b", "[TOKEN]"),
    (r"(?:[A-Za-z]:\\|/)(?:[\w.\-]+[/\\])+[\w.\-]*", "[PATH]"),
];

/// Error counts by category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_category: BTreeMap<ErrorCategory, u64>,
}

/// Error classifier and breaker feed
pub struct ErrorHandler {
    config: ErrorHandlingConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    time_provider: Arc<dyn TimeProvider>,
    redactions: Vec<(Regex, &'static str)>,
    counters: DashMap<ErrorCategory, u64>,
}

impl ErrorHandler {
    pub fn new(
        config: ErrorHandlingConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let redactions = REDACTIONS
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect();

        Self {
            config,
            breakers,
            time_provider,
            redactions,
            counters: DashMap::new(),
        }
    }

    /// Deterministic category for an error text and its context
    pub fn categorize(message: &str, context: &str) -> ErrorCategory {
        let message = message.to_lowercase();
        let context = context.to_lowercase();

        first_match(MESSAGE_RULES, &message)
            .or_else(|| first_match(CONTEXT_RULES, &context))
            .unwrap_or(ErrorCategory::ProcessingError)
    }

    /// Classify a raw error (including its `source()` chain) and record a
    /// failure on the context's breaker
    pub fn handle_error(&self, err: &(dyn StdError + 'static), context: &str) -> ClassifiedError {
        self.classify(err.to_string(), source_chain(err), context, true)
    }

    /// Classify a plain failure message and record a breaker failure
    pub fn handle_message(&self, message: &str, context: &str) -> ClassifiedError {
        self.classify(message.to_string(), Vec::new(), context, true)
    }

    /// Classify without touching the breaker (caller input errors, panics)
    pub fn classify_error(&self, err: &(dyn StdError + 'static), context: &str) -> ClassifiedError {
        self.classify(err.to_string(), source_chain(err), context, false)
    }

    pub fn classify_message(&self, message: &str, context: &str) -> ClassifiedError {
        self.classify(message.to_string(), Vec::new(), context, false)
    }

    pub fn handle_success(&self, context: &str) {
        self.breakers.record_success(context);
    }

    pub fn is_operation_allowed(&self, context: &str) -> bool {
        self.breakers.can_execute(context)
    }

    pub fn reset_circuit_breaker(&self, context: &str) -> bool {
        self.breakers.reset(context)
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Non-retryable rejection used for open circuits and missing services.
    ///
    /// Does not feed the breaker: nothing was attempted.
    pub fn service_unavailable(&self, context: &str, reason: &str) -> ClassifiedError {
        let now = self.time_provider.now_millis();
        self.bump(ErrorCategory::ResourceError);

        let technical = format!("service unavailable: {}", reason);
        let mut classified =
            ClassifiedError::new(ErrorCategory::ResourceError, technical.clone(), context, now)
                .with_detail(serde_json::json!({ "unavailable": true }));
        classified.retryable = false;
        classified.technical = self.redact(&technical);
        classified.message = if self.config.friendly_messages {
            "The processing service is temporarily unavailable. Please try again later."
                .to_string()
        } else {
            classified.technical.clone()
        };
        if self.config.include_suggestions {
            classified.suggestions = vec![
                "Wait a minute and submit the job again".to_string(),
                "Check the service health overview".to_string(),
            ];
        }

        info!(context, reason, "Service unavailable");
        classified
    }

    pub fn stats(&self) -> ErrorStats {
        let by_category: BTreeMap<ErrorCategory, u64> = self
            .counters
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        ErrorStats {
            total: by_category.values().sum(),
            by_category,
        }
    }

    /// Strip secrets, long tokens and filesystem paths (when enabled)
    pub fn redact(&self, text: &str) -> String {
        if !self.config.sanitize_errors {
            return text.to_string();
        }
        self.redactions
            .iter()
            .fold(text.to_string(), |acc, (re, replacement)| {
                re.replace_all(&acc, *replacement).into_owned()
            })
    }

    fn classify(
        &self,
        raw: String,
        trace: Vec<String>,
        context: &str,
        feed_breaker: bool,
    ) -> ClassifiedError {
        let now = self.time_provider.now_millis();

        let haystack = std::iter::once(raw.as_str())
            .chain(trace.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" | ");
        let category = Self::categorize(&haystack, context);

        let technical = self.redact(&raw);
        match category {
            ErrorCategory::SecurityError | ErrorCategory::ConfigurationError => {
                error!(context, category = %category, error = %technical, "Operation failed")
            }
            ErrorCategory::ProcessingError | ErrorCategory::StorageError => {
                warn!(context, category = %category, error = %technical, "Operation failed")
            }
            ErrorCategory::ValidationError | ErrorCategory::RateLimitError => {
                info!(context, category = %category, error = %technical, "Operation failed")
            }
            _ => debug!(context, category = %category, error = %technical, "Operation failed"),
        }

        if feed_breaker {
            self.breakers.record_failure(context);
        }
        self.bump(category);

        let mut classified = ClassifiedError::new(category, technical.clone(), context, now);
        classified.trace = trace.iter().map(|t| self.redact(t)).collect();
        if self.config.friendly_messages {
            classified.message = friendly_message(category).to_string();
        }
        if self.config.include_suggestions {
            classified.suggestions = suggestions(category)
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        classified
    }

    fn bump(&self, category: ErrorCategory) {
        *self.counters.entry(category).or_insert(0) += 1;
    }
}

fn source_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    let mut trace = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push(cause.to_string());
        source = cause.source();
    }
    trace
}

fn first_match(rules: &[(ErrorCategory, &[&str])], text: &str) -> Option<ErrorCategory> {
    rules
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| text.contains(p)))
        .map(|(category, _)| *category)
}

fn friendly_message(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::FileNotFound => "The requested file could not be found.",
        ErrorCategory::PermissionDenied => "You don't have permission to perform this operation.",
        ErrorCategory::ProcessingError => "Something went wrong while processing your media.",
        ErrorCategory::NetworkError => "A network problem interrupted the operation.",
        ErrorCategory::StorageError => "The file could not be stored or retrieved.",
        ErrorCategory::ValidationError => "The provided input is not valid for this operation.",
        ErrorCategory::ResourceError => "The system is busy right now.",
        ErrorCategory::SecurityError => "The request was blocked for security reasons.",
        ErrorCategory::RateLimitError => "Too many requests. Please slow down.",
        ErrorCategory::ConfigurationError => "The service is not configured correctly.",
    }
}

fn suggestions(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::FileNotFound => &[
            "Check that the file was uploaded completely",
            "Upload the file again",
        ],
        ErrorCategory::PermissionDenied => &[
            "Sign in again",
            "Ask the owner to grant access",
        ],
        ErrorCategory::ProcessingError => &[
            "Try again with a different file",
            "Contact support if the problem persists",
        ],
        ErrorCategory::NetworkError => &[
            "Check your internet connection",
            "Try again in a few moments",
        ],
        ErrorCategory::StorageError => &[
            "Try again in a few moments",
            "Free up storage space",
        ],
        ErrorCategory::ValidationError => &[
            "Check the file format and size",
            "Review the processing options",
        ],
        ErrorCategory::ResourceError => &[
            "Wait a minute and try again",
            "Try a smaller file",
        ],
        ErrorCategory::SecurityError => &["Use a file from a trusted source"],
        ErrorCategory::RateLimitError => &["Wait before submitting more jobs"],
        ErrorCategory::ConfigurationError => &["Contact the administrator"],
    }
}
