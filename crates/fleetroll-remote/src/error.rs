//! Remote access error types.

use fleetroll_core::CloudError;
use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no eligible remote target: {0}")]
    NoEligibleTarget(String),

    #[error(
        "connectivity check failed after {attempts} attempts. exit status: {} output: {stdout} error: {stderr}",
        display_status(*.exit_status)
    )]
    Connectivity {
        attempts: u32,
        /// `None` when the command could not be run or was killed by a signal.
        exit_status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to run remote command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("control plane error: {0}")]
    Cloud(#[from] CloudError),
}

fn display_status(status: Option<i32>) -> String {
    status.map_or_else(|| "none".to_string(), |code| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_message_names_exit_status() {
        let err = RemoteError::Connectivity {
            attempts: 3,
            exit_status: Some(255),
            stdout: String::new(),
            stderr: "Permission denied (publickey).".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit status: 255"));
        assert!(msg.contains("Permission denied"));
    }
}
