//! Command runner contract

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::storage::settings::RunnerSettings;

/// Result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,

    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command against a target server
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` on `server_id`. Implementations should honour
    /// `timeout` and report it as `CommandTimeout`; the executor also drops
    /// the future once it elapses.
    async fn run(
        &self,
        server_id: &str,
        command: &str,
        timeout: Duration,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, OrchestratorError>;
}

/// Runs commands through a local shell
#[derive(Debug, Clone)]
pub struct LocalShellRunner {
    shell: String,
    working_dir: PathBuf,
}

impl LocalShellRunner {
    pub fn new(shell: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            working_dir: working_dir.into(),
        }
    }
}

impl From<&RunnerSettings> for LocalShellRunner {
    fn from(settings: &RunnerSettings) -> Self {
        Self::new(settings.shell.clone(), settings.working_dir.clone())
    }
}

#[async_trait]
impl CommandRunner for LocalShellRunner {
    async fn run(
        &self,
        server_id: &str,
        command: &str,
        timeout: Duration,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, OrchestratorError> {
        debug!("[{}] $ {}", server_id, command);

        // kill_on_drop reaps the child when the timeout drops this future
        let child = Command::new(&self.shell)
            .current_dir(&self.working_dir)
            .args(["-c", command])
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OrchestratorError::CommandError(format!("Failed to spawn '{}': {}", command, e))
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::CommandTimeout(format!(
                    "'{}' timed out after {}s",
                    command,
                    timeout.as_secs()
                ))
            })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            // killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}
