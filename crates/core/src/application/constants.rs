// Engine constants (no magic values)
use std::time::Duration;

/// Upper bound for in-flight jobs to finish after shutdown is signalled (30s)
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a background loop to exit after shutdown is signalled (5s)
pub const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest owner id accepted on submission
pub const MAX_OWNER_ID_LEN: usize = 128;

/// Default page size for job listing
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page size for job listing
pub const MAX_LIST_LIMIT: usize = 500;

/// Message recorded on jobs evicted from the queue by age
pub const EXPIRED_BEFORE_DISPATCH: &str = "expired before dispatch";
