// Infrastructure Layer - adapters that need nothing beyond std/tokio

pub mod memory;

pub use memory::InMemoryJobStore;
