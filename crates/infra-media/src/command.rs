// Command runner for external media tools
// Spawns isolated child processes with environment allowlisting

use mediaflow_core::port::ServiceError;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Captured result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Runs tool binaries with a cleared environment and a hard timeout.
///
/// The child is killed when the timeout fires (`kill_on_drop`).
#[derive(Debug, Clone)]
pub struct CommandRunner {
    env_allowlist: Vec<String>,
    timeout: Duration,
}

impl CommandRunner {
    /// Create a new command runner
    ///
    /// # Arguments
    /// * `env_allowlist` - Parent environment variables passed to the child
    /// * `timeout` - Upper bound for a single run
    ///
    /// # Example
    /// ```text
    /// let runner = CommandRunner::new(vec!["PATH".into(), "HOME".into()], Duration::from_secs(120));
    /// ```
    pub fn new(env_allowlist: Vec<String>, timeout: Duration) -> Self {
        Self {
            env_allowlist,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allowlisted variables present in the parent environment
    fn filtered_env(&self) -> Vec<(String, String)> {
        self.env_allowlist
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Run `program` with `args`; non-zero exit is an error carrying stderr
    pub async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ServiceError> {
        let started = Instant::now();
        debug!(program, args = ?args, "Spawning command");

        let child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(self.filtered_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(program, timeout_ms, "Command timed out, killed");
                return Err(ServiceError::Timeout(timeout_ms));
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            warn!(
                program,
                exit_code = ?output.status.code(),
                duration_ms,
                "Command failed"
            );
            return Err(ServiceError::CommandFailed {
                code: output.status.code(),
                stderr,
            });
        }

        info!(program, duration_ms, "Command completed");
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            duration_ms,
        })
    }

    /// Run `program <version_arg>` and return the first output line
    pub async fn probe(&self, program: &str, version_arg: &str) -> Result<String, ServiceError> {
        let output = self.run(program, &[version_arg.to_string()]).await?;
        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

/// Reject paths that are empty, look like an option, or climb out of their directory
pub(crate) fn check_path(field: &str, path: &str) -> Result<(), ServiceError> {
    if path.trim().is_empty() {
        return Err(ServiceError::InvalidInput(format!("{} is empty", field)));
    }
    // Tools would parse a leading '-' as a flag
    if path.starts_with('-') {
        return Err(ServiceError::InvalidInput(format!(
            "{} must not start with '-'",
            field
        )));
    }
    let escapes = Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        return Err(ServiceError::InvalidInput(format!(
            "{} must not contain '..'",
            field
        )));
    }
    Ok(())
}
