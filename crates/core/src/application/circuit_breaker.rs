// Circuit Breaker
//
// Per-dependency state machine guarding service calls.
//
// States:
// - Closed: calls proceed, failures are counted
// - Open: calls rejected until the reset timeout elapses
// - HalfOpen: probe calls admitted; success closes, failure re-opens

use crate::config::CircuitBreakerConfig;
use crate::port::TimeProvider;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub context: String,
    pub state: CircuitState,
    pub failures: u64,
    pub successes: u64,
    pub requests: u64,
    pub last_failure_time: Option<i64>,
    pub last_success_time: Option<i64>,
    pub next_attempt_time: Option<i64>,
}

/// Circuit breaker for a single context key.
///
/// Time is passed in by the caller so the state machine stays pure.
/// Successes while closed only accumulate; they do not decay the failure
/// count, so sparse failures spread over a long time can still trip it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    context: String,
    failure_threshold: u32,
    reset_timeout_ms: u64,
    state: CircuitState,
    failures: u64,
    successes: u64,
    requests: u64,
    last_failure_time: Option<i64>,
    last_success_time: Option<i64>,
    next_attempt_time: Option<i64>,
}

impl CircuitBreaker {
    pub fn new(context: impl Into<String>, failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            context: context.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout_ms,
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            requests: 0,
            last_failure_time: None,
            last_success_time: None,
            next_attempt_time: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a call may proceed now.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open and
    /// admits the call.
    pub fn can_execute(&mut self, now: i64) -> bool {
        let allowed = match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.next_attempt_time.is_some_and(|next| now >= next) {
                    self.state = CircuitState::HalfOpen;
                    info!(context = %self.context, "Circuit breaker half-open, admitting probe");
                    true
                } else {
                    debug!(
                        context = %self.context,
                        next_attempt_time = ?self.next_attempt_time,
                        "Circuit breaker open, rejecting call"
                    );
                    false
                }
            }
        };

        if allowed {
            self.requests += 1;
        }
        allowed
    }

    pub fn record_success(&mut self, now: i64) {
        self.successes += 1;
        self.last_success_time = Some(now);

        if self.state == CircuitState::HalfOpen {
            info!(context = %self.context, "Circuit breaker closed after successful probe");
            self.reset();
        }
    }

    pub fn record_failure(&mut self, now: i64) {
        self.failures += 1;
        self.last_failure_time = Some(now);

        match self.state {
            CircuitState::Closed => {
                if self.failures >= u64::from(self.failure_threshold) {
                    self.open(now);
                    warn!(
                        context = %self.context,
                        failures = self.failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.open(now);
                warn!(context = %self.context, "Circuit breaker reopened after failed probe");
            }
            // Late failure from a call admitted before opening
            CircuitState::Open => {}
        }
    }

    /// Back to closed with all counters zeroed
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.successes = 0;
        self.requests = 0;
        self.next_attempt_time = None;
    }

    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            context: self.context.clone(),
            state: self.state,
            failures: self.failures,
            successes: self.successes,
            requests: self.requests,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
            next_attempt_time: self.next_attempt_time,
        }
    }

    fn open(&mut self, now: i64) {
        self.state = CircuitState::Open;
        let timeout = i64::try_from(self.reset_timeout_ms).unwrap_or(i64::MAX);
        self.next_attempt_time = Some(now.saturating_add(timeout));
    }
}

/// Breakers keyed by context, created lazily on first use.
///
/// Operations on one context are serialized by the map shard lock; different
/// contexts are independent.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
    config: CircuitBreakerConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            time_provider,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Always true when circuit breaking is disabled
    pub fn can_execute(&self, context: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let now = self.time_provider.now_millis();
        self.breaker_mut(context).can_execute(now)
    }

    pub fn record_success(&self, context: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.time_provider.now_millis();
        self.breaker_mut(context).record_success(now);
    }

    pub fn record_failure(&self, context: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.time_provider.now_millis();
        self.breaker_mut(context).record_failure(now);
    }

    /// Reset one breaker, returns whether it existed
    pub fn reset(&self, context: &str) -> bool {
        match self.breakers.get_mut(context) {
            Some(mut breaker) => {
                breaker.reset();
                info!(context, "Circuit breaker manually reset");
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for mut entry in self.breakers.iter_mut() {
            entry.value_mut().reset();
        }
        info!(count = self.breakers.len(), "All circuit breakers reset");
    }

    /// Stats for a context; unknown contexts report a fresh closed breaker
    pub fn stats(&self, context: &str) -> CircuitStats {
        match self.breakers.get(context) {
            Some(breaker) => breaker.stats(),
            None => self.fresh(context).stats(),
        }
    }

    pub fn all_stats(&self) -> BTreeMap<String, CircuitStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    fn fresh(&self, context: &str) -> CircuitBreaker {
        CircuitBreaker::new(
            context,
            self.config.failure_threshold,
            self.config.reset_timeout_ms,
        )
    }

    fn breaker_mut(&self, context: &str) -> dashmap::mapref::one::RefMut<'_, String, CircuitBreaker> {
        self.breakers
            .entry(context.to_string())
            .or_insert_with(|| self.fresh(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    fn registry(threshold: u32, reset_ms: u64) -> (CircuitBreakerRegistry, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let config = CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
        };
        (CircuitBreakerRegistry::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = CircuitBreaker::new("video", 3, 1000);

        breaker.record_failure(10);
        breaker.record_failure(20);
        assert!(breaker.can_execute(25));

        breaker.record_failure(30);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().next_attempt_time, Some(1030));
        assert!(!breaker.can_execute(500));
    }

    #[test]
    fn test_half_open_after_timeout_then_closes() {
        let mut breaker = CircuitBreaker::new("video", 3, 1000);
        for t in 0..3 {
            breaker.record_failure(t);
        }

        assert!(!breaker.can_execute(1001));
        assert!(breaker.can_execute(1002));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success(1100);
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.successes, 0);
        assert_eq!(stats.last_success_time, Some(1100));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new("image", 1, 500);
        breaker.record_failure(0);
        assert!(breaker.can_execute(500));

        breaker.record_failure(600);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().next_attempt_time, Some(1100));
        assert!(!breaker.can_execute(700));
    }

    #[test]
    fn test_late_failure_while_open_keeps_deadline() {
        let mut breaker = CircuitBreaker::new("audio", 2, 1000);
        breaker.record_failure(0);
        breaker.record_failure(100);
        assert_eq!(breaker.stats().next_attempt_time, Some(1100));

        breaker.record_failure(900);
        let stats = breaker.stats();
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.next_attempt_time, Some(1100));
        assert_eq!(stats.last_failure_time, Some(900));
    }

    #[test]
    fn test_closed_successes_do_not_decay_failures() {
        let mut breaker = CircuitBreaker::new("image", 3, 1000);
        breaker.record_failure(0);
        breaker.record_success(1);
        breaker.record_success(2);
        breaker.record_failure(3);
        breaker.record_failure(4);

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_registry_contexts_are_independent() {
        let (registry, clock) = registry(3, 60_000);

        for _ in 0..3 {
            assert!(registry.can_execute("video"));
            registry.record_failure("video");
        }
        assert!(!registry.can_execute("video"));
        assert!(registry.can_execute("image"));

        clock.advance(60_000);
        assert!(registry.can_execute("video"));
        assert_eq!(registry.stats("video").state, CircuitState::HalfOpen);

        registry.record_success("video");
        assert_eq!(registry.stats("video").failures, 0);
        assert_eq!(registry.stats("video").state, CircuitState::Closed);
    }

    #[test]
    fn test_registry_requests_and_reset() {
        let (registry, _) = registry(1, 60_000);
        registry.can_execute("storage");
        registry.can_execute("storage");
        registry.record_failure("storage");
        registry.can_execute("storage");

        let stats = registry.stats("storage");
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.state, CircuitState::Open);

        assert!(registry.reset("storage"));
        assert!(!registry.reset("unknown"));
        assert!(registry.can_execute("storage"));

        registry.record_failure("storage");
        registry.record_failure("image");
        registry.reset_all();
        assert!(registry
            .all_stats()
            .values()
            .all(|s| s.state == CircuitState::Closed && s.failures == 0));
    }

    #[test]
    fn test_disabled_registry_always_allows() {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let config = CircuitBreakerConfig {
            enabled: false,
            failure_threshold: 1,
            reset_timeout_ms: 60_000,
        };
        let registry = CircuitBreakerRegistry::new(config, clock);

        registry.record_failure("video");
        registry.record_failure("video");
        assert!(registry.can_execute("video"));
        assert!(registry.all_stats().is_empty());
    }
}
