//! Change-set error types.

use std::time::Duration;

use fleetroll_core::config::format_duration;
use fleetroll_core::{ChangeSetStatus, CloudError};
use thiserror::Error;

pub type ChangeSetResult<T> = Result<T, ChangeSetError>;

#[derive(Debug, Error)]
pub enum ChangeSetError {
    #[error(
        "change set {name} did not reach a terminal status within {}",
        format_duration(*.timeout)
    )]
    Timeout { name: String, timeout: Duration },

    #[error("change set {name} was not created ({status}): {}", .reason.as_deref().unwrap_or("no reason given"))]
    NotCreated {
        name: String,
        status: ChangeSetStatus,
        reason: Option<String>,
    },

    #[error("cannot confirm change set {0} when interactive mode is disabled")]
    NonInteractive(String),

    #[error("change set {name} could not be deleted after {attempts} attempts")]
    DeleteRetriesExhausted { name: String, attempts: u32 },

    #[error("control plane error: {0}")]
    Cloud(#[from] CloudError),

    #[error("prompt failed: {0}")]
    Prompt(#[from] std::io::Error),
}
