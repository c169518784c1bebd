// Retry Manager
// Backoff delay calculation, retryability decisions and the retry loop

use crate::port::ServiceError;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base`
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt-1)`
    Exponential,
    /// `base * fib(attempt)`, fib(1) = fib(2) = 1
    Fibonacci,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub min_delay_ms: u64,
    pub strategy: BackoffStrategy,
    /// Symmetric jitter as a percentage of the computed delay
    pub jitter_percent: f64,
    /// Extra case-insensitive substrings that mark an error retryable
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            min_delay_ms: 100,
            strategy: BackoffStrategy::Exponential,
            jitter_percent: 10.0,
            retryable_patterns: Vec::new(),
        }
    }
}

/// Built-in transient failure markers (matched against lowercased text)
const TRANSIENT_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "connection reset",
    "connection refused",
    "socket hang up",
    "rate limit",
    "too many requests",
    "quota",
    "server error",
    "bad gateway",
    "gateway timeout",
    "temporarily unavailable",
];

static SERVER_STATUS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:status|http|code)[ :=]*(?:429|5\d\d)\b").ok());

/// Error type usable with the retry loop
pub trait RetryableFailure: fmt::Display {
    /// A rejection (circuit open) ends the loop without consuming an attempt
    fn is_rejection(&self) -> bool {
        false
    }
}

impl RetryableFailure for String {}

impl RetryableFailure for ServiceError {}

/// Result of `RetryManager::execute_with_retry`
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Option<T>,
    pub success: bool,
    /// Attempts that actually invoked the operation
    pub attempts: u32,
    pub total_time_ms: u64,
    pub last_error: Option<E>,
}

/// Retry manager
///
/// Wraps a fallible async operation, sleeping between attempts according to
/// the policy. Sleeps suspend only the calling task.
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay for `attempt` (1-based) before jitter and clamping
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let attempt = attempt.max(1);
        let base = self.policy.base_delay_ms;

        match self.policy.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt)),
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt - 1))
            }
            BackoffStrategy::Fibonacci => base.saturating_mul(fibonacci(attempt)),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    ///
    /// Applies uniform jitter of `±delay * jitter_percent / 100`, then clamps
    /// to `[min_delay_ms, max_delay_ms]`.
    ///
    /// # Example
    /// ```text
    /// exponential, base 100ms: attempt 1 -> ~100ms, 2 -> ~200ms, 3 -> ~400ms
    /// ```
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_ms(attempt) as f64;

        let spread = raw * self.policy.jitter_percent / 100.0;
        let jittered = if spread > 0.0 {
            raw + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            raw
        };

        let min = self.policy.min_delay_ms as f64;
        let max = self.policy.max_delay_ms as f64;
        let clamped = jittered.max(min).min(max).max(0.0);

        Duration::from_millis(clamped.round() as u64)
    }

    /// Case-insensitive match against transient failure markers and the
    /// configured extra patterns
    pub fn is_retryable_error(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();

        if TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return true;
        }
        if SERVER_STATUS
            .as_ref()
            .is_some_and(|re| re.is_match(&lowered))
        {
            return true;
        }
        self.policy
            .retryable_patterns
            .iter()
            .any(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
    }

    /// Run `operation` up to `max_retries + 1` times
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        context: &str,
    ) -> RetryOutcome<T, E>
    where
        E: RetryableFailure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_progress(operation, context, |_, _, _| {})
            .await
    }

    /// Like `execute_with_retry`, calling `on_retry(attempt, error, delay)`
    /// before each backoff sleep
    pub async fn execute_with_progress<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        context: &str,
        mut on_retry: P,
    ) -> RetryOutcome<T, E>
    where
        E: RetryableFailure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(u32, &E, Duration),
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempts = 0u32;
        let mut last_error = None;

        while attempts < max_attempts {
            let error = match operation().await {
                Ok(value) => {
                    attempts += 1;
                    if attempts > 1 {
                        info!(context, attempts, "Operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Some(value),
                        success: true,
                        attempts,
                        total_time_ms: elapsed_ms(started),
                        last_error: None,
                    };
                }
                Err(e) => e,
            };

            if error.is_rejection() {
                debug!(context, error = %error, "Attempt rejected, not retrying");
                last_error = Some(error);
                break;
            }
            attempts += 1;

            if !self.is_retryable_error(&error.to_string()) {
                debug!(context, attempt = attempts, error = %error, "Non-retryable failure");
                last_error = Some(error);
                break;
            }
            if attempts >= max_attempts {
                last_error = Some(error);
                break;
            }

            let delay = self.calculate_delay(attempts);
            warn!(
                context,
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            on_retry(attempts, &error, delay);
            last_error = Some(error);

            tokio::time::sleep(delay).await;
        }

        RetryOutcome {
            result: None,
            success: false,
            attempts,
            total_time_ms: elapsed_ms(started),
            last_error,
        }
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n <= 2 {
        1
    } else {
        b
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            min_delay_ms: 0,
            strategy,
            jitter_percent: 0.0,
            retryable_patterns: Vec::new(),
        }
    }

    #[derive(Debug)]
    struct Rejected;

    impl fmt::Display for Rejected {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("circuit open")
        }
    }

    impl RetryableFailure for Rejected {
        fn is_rejection(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_strategy_delays() {
        let fixed = RetryManager::new(policy(BackoffStrategy::Fixed));
        let linear = RetryManager::new(policy(BackoffStrategy::Linear));
        let exp = RetryManager::new(policy(BackoffStrategy::Exponential));
        let fib = RetryManager::new(policy(BackoffStrategy::Fibonacci));

        let delays = |m: &RetryManager| (1..=5).map(|a| m.base_delay_ms(a)).collect::<Vec<_>>();

        assert_eq!(delays(&fixed), vec![100, 100, 100, 100, 100]);
        assert_eq!(delays(&linear), vec![100, 200, 300, 400, 500]);
        assert_eq!(delays(&exp), vec![100, 200, 400, 800, 1600]);
        assert_eq!(delays(&fib), vec![100, 100, 200, 300, 500]);
    }

    #[test]
    fn test_delay_is_clamped() {
        let mut p = policy(BackoffStrategy::Exponential);
        p.max_delay_ms = 250;
        p.min_delay_ms = 150;
        let manager = RetryManager::new(p);

        assert_eq!(manager.calculate_delay(1), Duration::from_millis(150));
        assert_eq!(manager.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(manager.calculate_delay(10), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut p = policy(BackoffStrategy::Exponential);
        p.jitter_percent = 10.0;
        let manager = RetryManager::new(p);

        for _ in 0..200 {
            let ms = manager.calculate_delay(3).as_millis();
            assert!((360..=440).contains(&ms), "delay {ms} outside ±10% of 400");
        }
    }

    #[test]
    fn test_retryable_classification() {
        let mut p = policy(BackoffStrategy::Fixed);
        p.retryable_patterns = vec!["Busy Backend".into()];
        let manager = RetryManager::new(p);

        assert!(manager.is_retryable_error("Connection timeout"));
        assert!(manager.is_retryable_error("NETWORK unreachable"));
        assert!(manager.is_retryable_error("Rate limit exceeded"));
        assert!(manager.is_retryable_error("upstream returned HTTP 503"));
        assert!(manager.is_retryable_error("status code 429"));
        assert!(manager.is_retryable_error("Resource temporarily unavailable"));
        assert!(manager.is_retryable_error("busy backend, try later"));

        assert!(!manager.is_retryable_error("invalid input format"));
        assert!(!manager.is_retryable_error("file not found"));
        assert!(!manager.is_retryable_error("invalid width 512"));
        assert!(!manager.is_retryable_error("Stream #0:1: Audio: mp3, 44100 Hz, stereo, 500 kb/s"));
        assert!(!manager.is_retryable_error("unsupported image header at offset 599"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_after_one_attempt() {
        let manager = RetryManager::new(policy(BackoffStrategy::Exponential));
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let outcome: RetryOutcome<(), String> = manager
            .execute_with_retry(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Err("invalid input format".to_string()) }
                },
                "image",
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.last_error.as_deref(), Some("invalid input format"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_uses_full_budget_with_backoff() {
        let mut p = policy(BackoffStrategy::Exponential);
        p.jitter_percent = 10.0;
        let manager = RetryManager::new(p);

        let mut seen = Vec::new();
        let outcome: RetryOutcome<(), String> = manager
            .execute_with_progress(
                || async { Err("connection timeout".to_string()) },
                "video",
                |attempt, _err, delay| seen.push((attempt, delay.as_millis())),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(seen.len(), 3);

        let expected = [100u128, 200, 400];
        for ((attempt, delay), (i, base)) in seen.iter().zip(expected.iter().enumerate()) {
            assert_eq!(*attempt, i as u32 + 1);
            let spread = base / 10;
            assert!(*delay >= base - spread && *delay <= base + spread);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let manager = RetryManager::new(policy(BackoffStrategy::Linear));
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let outcome: RetryOutcome<&str, String> = manager
            .execute_with_retry(
                move || {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("network error".to_string())
                        } else {
                            Ok("done")
                        }
                    }
                },
                "audio",
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.result, Some("done"));
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.last_error.is_none());
        assert!(outcome.total_time_ms >= 300);
    }

    #[tokio::test]
    async fn test_rejection_consumes_no_attempt() {
        let manager = RetryManager::new(policy(BackoffStrategy::Fixed));

        let outcome: RetryOutcome<(), Rejected> = manager
            .execute_with_retry(|| async { Err(Rejected) }, "video")
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.last_error.is_some());
    }
}
