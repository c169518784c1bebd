// Domain Layer - Pure business logic and entities

pub mod classified;
pub mod error;
pub mod job;

// Re-exports
pub use classified::{ClassifiedError, ErrorCategory};
pub use error::DomainError;
pub use job::{Job, JobId, JobPayload, JobSpec, JobStatus, JobType, Priority, ServiceType};
