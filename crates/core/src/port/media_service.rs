// Media Service Port
// Contract every processing backend (image/video/audio/storage) implements

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a processing backend
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Command failed with exit code {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a backend health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub message: Option<String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }
}

/// What a backend can do
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCapabilities {
    pub operations: Vec<String>,
    pub max_input_bytes: Option<u64>,
    pub max_concurrency: Option<usize>,
}

/// Processing collaborator contract.
///
/// The registry is the sole caller of `health_check` and `cleanup`; the
/// dispatcher is the sole caller of `validate_input` and `process_media`.
#[async_trait]
pub trait MediaService: Send + Sync {
    /// Human-readable backend name (for logs)
    fn name(&self) -> &str;

    /// Run the processing step, returning an opaque result document
    async fn process_media(
        &self,
        input: &serde_json::Value,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError>;

    /// Reject inputs before any work is attempted
    async fn validate_input(
        &self,
        input: &serde_json::Value,
        options: &serde_json::Value,
    ) -> Result<(), ServiceError>;

    /// Supported input formats (extensions or MIME types)
    fn supported_types(&self) -> Vec<String>;

    fn capabilities(&self) -> ServiceCapabilities;

    async fn health_check(&self) -> Result<HealthReport, ServiceError>;

    /// Release resources (scratch files, connections)
    async fn cleanup(&self) -> Result<(), ServiceError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Scripted outcome of one `process_media` call
    #[derive(Debug, Clone)]
    pub enum MockOutcome {
        Success(serde_json::Value),
        Fail(String),
        /// Sleep, then succeed (for timeout tests)
        Hang(Duration),
        Panic(String),
    }

    /// Mock media service with a scripted outcome queue.
    ///
    /// When the script runs out, `fallback` is used for every further call.
    pub struct MockMediaService {
        name: String,
        script: Mutex<VecDeque<MockOutcome>>,
        fallback: Mutex<MockOutcome>,
        healthy: AtomicBool,
        health_errors: AtomicBool,
        health_panics: AtomicBool,
        cleanup_fails: AtomicBool,
        invalid_input: Mutex<Option<String>>,
        process_calls: AtomicUsize,
        health_calls: AtomicUsize,
        cleanup_calls: AtomicUsize,
    }

    impl MockMediaService {
        pub fn new(name: impl Into<String>, fallback: MockOutcome) -> Self {
            Self {
                name: name.into(),
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                healthy: AtomicBool::new(true),
                health_errors: AtomicBool::new(false),
                health_panics: AtomicBool::new(false),
                cleanup_fails: AtomicBool::new(false),
                invalid_input: Mutex::new(None),
                process_calls: AtomicUsize::new(0),
                health_calls: AtomicUsize::new(0),
                cleanup_calls: AtomicUsize::new(0),
            }
        }

        pub fn new_success(name: impl Into<String>) -> Arc<Self> {
            Arc::new(Self::new(
                name,
                MockOutcome::Success(serde_json::json!({"ok": true})),
            ))
        }

        pub fn new_failing(name: impl Into<String>, message: impl Into<String>) -> Arc<Self> {
            Arc::new(Self::new(name, MockOutcome::Fail(message.into())))
        }

        /// Queue outcomes consumed before the fallback
        pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
            self.script.lock().unwrap().extend(outcomes);
        }

        pub fn set_fallback(&self, outcome: MockOutcome) {
            *self.fallback.lock().unwrap() = outcome;
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        /// Make `health_check` return an error instead of a report
        pub fn set_health_errors(&self, errors: bool) {
            self.health_errors.store(errors, Ordering::SeqCst);
        }

        pub fn set_health_panics(&self, panics: bool) {
            self.health_panics.store(panics, Ordering::SeqCst);
        }

        pub fn set_cleanup_fails(&self, fails: bool) {
            self.cleanup_fails.store(fails, Ordering::SeqCst);
        }

        pub fn reject_inputs(&self, reason: impl Into<String>) {
            *self.invalid_input.lock().unwrap() = Some(reason.into());
        }

        pub fn process_calls(&self) -> usize {
            self.process_calls.load(Ordering::SeqCst)
        }

        pub fn health_calls(&self) -> usize {
            self.health_calls.load(Ordering::SeqCst)
        }

        pub fn cleanup_calls(&self) -> usize {
            self.cleanup_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaService for MockMediaService {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process_media(
            &self,
            _input: &serde_json::Value,
            _options: &serde_json::Value,
        ) -> Result<serde_json::Value, ServiceError> {
            self.process_calls.fetch_add(1, Ordering::SeqCst);

            let outcome = {
                let next = self.script.lock().unwrap().pop_front();
                next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
            };

            match outcome {
                MockOutcome::Success(value) => Ok(value),
                MockOutcome::Fail(msg) => Err(ServiceError::Failed(msg)),
                MockOutcome::Hang(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(serde_json::json!({"late": true}))
                }
                MockOutcome::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for isolation testing
                }
            }
        }

        async fn validate_input(
            &self,
            _input: &serde_json::Value,
            _options: &serde_json::Value,
        ) -> Result<(), ServiceError> {
            match self.invalid_input.lock().unwrap().clone() {
                Some(reason) => Err(ServiceError::InvalidInput(reason)),
                None => Ok(()),
            }
        }

        fn supported_types(&self) -> Vec<String> {
            vec!["mock".to_string()]
        }

        fn capabilities(&self) -> ServiceCapabilities {
            ServiceCapabilities {
                operations: vec!["mock".to_string()],
                ..Default::default()
            }
        }

        async fn health_check(&self) -> Result<HealthReport, ServiceError> {
            self.health_calls.fetch_add(1, Ordering::SeqCst);
            if self.health_panics.load(Ordering::SeqCst) {
                panic!("mock health check panic");
            }
            if self.health_errors.load(Ordering::SeqCst) {
                return Err(ServiceError::Failed("health endpoint unreachable".into()));
            }
            if self.healthy.load(Ordering::SeqCst) {
                Ok(HealthReport::healthy())
            } else {
                Ok(HealthReport::unhealthy("mock reports unhealthy"))
            }
        }

        async fn cleanup(&self) -> Result<(), ServiceError> {
            self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            if self.cleanup_fails.load(Ordering::SeqCst) {
                return Err(ServiceError::Failed("cleanup failed".into()));
            }
            Ok(())
        }
    }
}
