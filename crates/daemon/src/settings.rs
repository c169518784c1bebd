//! Daemon settings
//!
//! Layered from an optional TOML file and `MEDIAFLOW__*` environment
//! variables, e.g. `MEDIAFLOW__RPC__PORT=9600` or
//! `MEDIAFLOW__ENGINE__MAX_CONCURRENT_JOBS=8`.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use mediaflow_api_rpc::RpcServerConfig;
use mediaflow_core::application::ServiceConfig;
use mediaflow_core::EngineConfig;
use serde::Deserialize;
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "MEDIAFLOW_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "mediaflow.toml";
const ENV_PREFIX: &str = "MEDIAFLOW";

/// `database_url` value that selects the non-durable in-memory store
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub engine: EngineConfig,
    /// `memory` or a sqlite URL
    pub database_url: String,
    pub rpc: RpcServerConfig,
    pub log: LogSettings,
    pub media: MediaSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Daily rolling log files are written here when set
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            directory: None,
            file_prefix: "mediaflow.log".to_string(),
        }
    }
}

/// External tool backends
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub image: BackendSettings,
    pub audio: BackendSettings,
    pub video: BackendSettings,
    /// Per-invocation limit for tool subprocesses
    pub command_timeout_ms: u64,
    /// Environment variables passed through to tool subprocesses
    pub env_allowlist: Vec<String>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            image: BackendSettings::default(),
            audio: BackendSettings::default(),
            video: BackendSettings::default(),
            command_timeout_ms: 10 * 60 * 1000,
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string(), "TMPDIR".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub enabled: bool,
    /// Tool binary; each backend falls back to its conventional name
    pub binary: Option<String>,
    /// Discovery priority of the registration
    pub priority: i32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: None,
            priority: 0,
        }
    }
}

impl BackendSettings {
    pub fn binary_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.binary.as_deref().unwrap_or(fallback)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            priority: self.priority,
        }
    }
}

impl DaemonSettings {
    /// Load from `$MEDIAFLOW_CONFIG` (default `mediaflow.toml`, optional) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_builder(Config::builder().add_source(File::with_name(&path).required(false)))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let mut settings: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if settings.database_url.is_empty() {
            settings.database_url = MEMORY_DATABASE.to_string();
        }
        Ok(settings)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }
}
