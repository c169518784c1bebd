// Application Layer - Use Cases and Dispatch Services

pub mod circuit_breaker;
pub mod constants;
pub mod dispatcher;
pub mod engine;
pub mod error_handler;
pub mod jobs;
pub mod queue;
pub mod recovery;
pub mod retention;
pub mod retry;
pub mod service_registry;
pub mod shutdown;

// Re-exports
pub use circuit_breaker::{CircuitBreakerRegistry, CircuitState, CircuitStats};
pub use dispatcher::Dispatcher;
pub use engine::Engine;
pub use error_handler::{ErrorHandler, ErrorStats};
pub use jobs::{EngineStats, JobService};
pub use queue::{PriorityJobQueue, QueueStats, SharedQueue};
pub use recovery::{QueueRecovery, RecoveryReport};
pub use retention::{RetentionSweeper, SweepReport};
pub use retry::{BackoffStrategy, RetryManager, RetryOutcome, RetryPolicy};
pub use service_registry::{HealthSummary, ServiceConfig, ServiceInfo, ServiceRegistry};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
