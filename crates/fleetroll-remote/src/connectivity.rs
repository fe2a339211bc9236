//! Remote connectivity check.
//!
//! Runs a no-op command on a target through the remote shell, retrying a
//! bounded number of times with a fixed pause between attempts.

use fleetroll_core::ConnectivityConfig;
use tracing::{debug, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::executor::{CommandOutput, RemoteShell};
use crate::selector::RemoteTarget;

/// Result of a single connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The command exited 0.
    Healthy,
    /// The command ran but exited non-zero.
    Unhealthy,
    /// The command could not be run.
    Failed,
}

impl ProbeResult {
    fn classify(outcome: &std::io::Result<CommandOutput>) -> Self {
        match outcome {
            Ok(output) if output.success() => Self::Healthy,
            Ok(_) => Self::Unhealthy,
            Err(_) => Self::Failed,
        }
    }
}

pub struct ConnectivityValidator {
    shell: RemoteShell,
    config: ConnectivityConfig,
}

impl ConnectivityValidator {
    pub fn new(shell: RemoteShell, config: ConnectivityConfig) -> Self {
        Self { shell, config }
    }

    /// Succeed as soon as one probe is healthy.
    ///
    /// After `attempts` failed probes, returns `RemoteError::Connectivity`
    /// with the last exit status and captured streams.
    pub async fn verify(&self, target: &RemoteTarget) -> RemoteResult<()> {
        let attempts = self.config.attempts.max(1);
        let mut last = CommandOutput::default();

        for attempt in 1..=attempts {
            let outcome = self.shell.exec(&self.config.command, &target.host).await;
            match ProbeResult::classify(&outcome) {
                ProbeResult::Healthy => {
                    debug!(instance = %target.instance_id, attempt, "remote shell reachable");
                    return Ok(());
                }
                ProbeResult::Unhealthy | ProbeResult::Failed => {
                    last = match outcome {
                        Ok(output) => output,
                        Err(e) => CommandOutput {
                            stdout: String::new(),
                            stderr: e.to_string(),
                            exit_status: None,
                        },
                    };
                    warn!(
                        instance = %target.instance_id,
                        attempt,
                        attempts,
                        exit_status = ?last.exit_status,
                        "remote shell probe failed"
                    );
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.backoff).await;
            }
        }

        Err(RemoteError::Connectivity {
            attempts,
            exit_status: last.exit_status,
            stdout: last.stdout,
            stderr: last.stderr,
        })
    }
}
