// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod media_service;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use job_store::{JobFilter, JobStats, JobStore};
pub use media_service::{HealthReport, MediaService, ServiceCapabilities, ServiceError};
pub use time_provider::TimeProvider;
