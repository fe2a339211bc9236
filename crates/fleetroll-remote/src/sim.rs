//! Remote executor backed by the simulated cloud.
//!
//! Scripted runs are consumed first, in order. Without a script, a command
//! containing `shutdown` halts the matching simulated instance and reports
//! the dropped connection (exit 255); anything else succeeds.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fleetroll_core::sim::SimulatedCloud;

use crate::command::RemoteCommand;
use crate::executor::{CommandOutput, RemoteExecutor};

/// A canned executor response.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Exit(CommandOutput),
    TransportError(String),
}

impl ScriptedRun {
    pub fn exit(status: i32, stdout: &str, stderr: &str) -> Self {
        Self::Exit(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_status: Some(status),
        })
    }

    pub fn transport_error(message: &str) -> Self {
        Self::TransportError(message.to_string())
    }
}

#[derive(Debug, Default)]
struct ShellState {
    script: VecDeque<ScriptedRun>,
    history: Vec<RemoteCommand>,
}

pub struct SimulatedShell {
    cloud: Arc<SimulatedCloud>,
    state: Mutex<ShellState>,
}

impl SimulatedShell {
    pub fn new(cloud: Arc<SimulatedCloud>) -> Self {
        Self {
            cloud,
            state: Mutex::new(ShellState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a response for the next unscripted run.
    pub fn script(&self, run: ScriptedRun) {
        self.state().script.push_back(run);
    }

    /// Every command run so far, oldest first.
    pub fn commands(&self) -> Vec<RemoteCommand> {
        self.state().history.clone()
    }
}

#[async_trait]
impl RemoteExecutor for SimulatedShell {
    async fn run(&self, command: &RemoteCommand) -> std::io::Result<CommandOutput> {
        let scripted = {
            let mut state = self.state();
            state.history.push(command.clone());
            state.script.pop_front()
        };

        match scripted {
            Some(ScriptedRun::Exit(output)) => Ok(output),
            Some(ScriptedRun::TransportError(message)) => Err(std::io::Error::other(message)),
            None if command.command.contains("shutdown") => {
                if self.cloud.halt_instance(&command.host) {
                    Ok(CommandOutput {
                        stdout: String::new(),
                        stderr: format!("Connection to {} closed by remote host.", command.host),
                        exit_status: Some(255),
                    })
                } else {
                    Ok(CommandOutput {
                        stdout: String::new(),
                        stderr: format!("ssh: connect to host {} port 22: No route to host", command.host),
                        exit_status: Some(255),
                    })
                }
            }
            None => Ok(CommandOutput {
                exit_status: Some(0),
                ..Default::default()
            }),
        }
    }
}
