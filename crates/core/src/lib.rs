// Mediaflow Core - Domain Logic, Ports & Dispatch Services
// NO infrastructure dependencies beyond the in-memory store (hexagonal architecture)

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

pub use config::EngineConfig;
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
