//! Engine configuration
//!
//! Every field has a default so partial TOML files and environment overrides
//! deserialize cleanly. Durations are milliseconds.

use crate::application::retry::{BackoffStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Jobs executed concurrently by the dispatcher
    pub max_concurrent_jobs: usize,
    /// Idle poll interval when the queue is empty
    pub processing_interval_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Upper bound for a single service call
    pub attempt_timeout_ms: u64,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    /// Terminal jobs older than this are garbage-collected
    pub job_retention_ms: u64,
    pub sweep_interval_ms: u64,
    /// Pending jobs older than this are evicted from the queue (disabled when unset)
    pub max_pending_age_ms: Option<u64>,
    pub errors: ErrorHandlingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            processing_interval_ms: 1000,
            max_retries: 3,
            attempt_timeout_ms: 5 * 60 * 1000,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            health_check_interval_ms: 60_000,
            health_check_timeout_ms: 10_000,
            job_retention_ms: 7 * 24 * 60 * 60 * 1000,
            sweep_interval_ms: 60 * 60 * 1000,
            max_pending_age_ms: None,
            errors: ErrorHandlingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build the retry policy from `max_retries` and the `retry` section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.retry.base_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
            min_delay_ms: self.retry.min_delay_ms,
            strategy: self.retry.strategy,
            jitter_percent: self.retry.jitter_percent,
            retryable_patterns: self.retry.retryable_patterns.clone(),
        }
    }

    /// Reject values that would stall or spin the engine
    pub fn validate(&self) -> crate::Result<()> {
        use crate::AppError;

        if self.max_concurrent_jobs == 0 {
            return Err(AppError::Config("max_concurrent_jobs must be > 0".into()));
        }
        if self.processing_interval_ms == 0 {
            return Err(AppError::Config("processing_interval_ms must be > 0".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::Config(
                "circuit_breaker.failure_threshold must be > 0".into(),
            ));
        }
        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(AppError::Config(format!(
                "retry.min_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.min_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.retry.jitter_percent > 100.0 || self.retry.jitter_percent < 0.0 {
            return Err(AppError::Config(
                "retry.jitter_percent must be within 0..=100".into(),
            ));
        }
        if self.health_check_interval_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(AppError::Config("background intervals must be > 0".into()));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(AppError::Config("attempt_timeout_ms must be > 0".into()));
        }
        if self.health_check_timeout_ms == 0 {
            return Err(AppError::Config("health_check_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_delay_ms: u64,
    pub jitter_percent: f64,
    /// Extra substrings that mark an error as retryable
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            min_delay_ms: 100,
            jitter_percent: 10.0,
            retryable_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub friendly_messages: bool,
    pub sanitize_errors: bool,
    pub include_suggestions: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            friendly_messages: true,
            sanitize_errors: true,
            include_suggestions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health_check_interval_ms, 60_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "max_concurrent_jobs": 8,
            "retry": { "strategy": "fibonacci" }
        }))
        .unwrap();

        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.retry.strategy, BackoffStrategy::Fibonacci);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_retry_policy_carries_max_retries() {
        let config = EngineConfig {
            max_retries: 7,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = EngineConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_concurrent_jobs = 1;
        config.retry.min_delay_ms = 50_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let config = EngineConfig {
            attempt_timeout_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("attempt_timeout_ms"));

        let config = EngineConfig {
            health_check_timeout_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("health_check_timeout_ms"));
    }
}
