//! Remote command execution.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use fleetroll_core::SshConfig;
use tracing::debug;

use crate::command::{RemoteCommand, SshCommandBuilder};

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was terminated by a signal.
    pub exit_status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Runs a rendered remote command.
///
/// Implementations return `Err` only when the command could not be run at
/// all. A non-zero exit status is a normal `Ok` result.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, command: &RemoteCommand) -> std::io::Result<CommandOutput>;
}

/// Runs commands through the local `sh`.
#[derive(Debug, Clone)]
pub struct ForkExecutor {
    shell: String,
}

impl Default for ForkExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ForkExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different shell binary (it must accept `-c <line>`).
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for ForkExecutor {
    async fn run(&self, command: &RemoteCommand) -> std::io::Result<CommandOutput> {
        debug!(line = %command.line(), "running remote command");
        // `output()` reads stdout and stderr concurrently until the child exits.
        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command.line())
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandOutput {
            stdout: chomp(&output.stdout),
            stderr: chomp(&output.stderr),
            exit_status: output.status.code(),
        })
    }
}

fn chomp(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// ssh settings bound to an executor.
#[derive(Clone)]
pub struct RemoteShell {
    ssh: SshConfig,
    executor: Arc<dyn RemoteExecutor>,
}

impl RemoteShell {
    pub fn new(ssh: SshConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { ssh, executor }
    }

    pub fn ssh(&self) -> &SshConfig {
        &self.ssh
    }

    /// Run `command` on `host`.
    pub async fn exec(&self, command: &str, host: &str) -> std::io::Result<CommandOutput> {
        let remote = SshCommandBuilder::new(&self.ssh).build(host, command);
        let output = self.executor.run(&remote).await?;
        debug!(
            %host,
            %command,
            exit_status = ?output.exit_status,
            "remote command finished"
        );
        Ok(output)
    }
}
