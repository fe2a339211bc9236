//! Rotation error types.

use std::time::Duration;

use fleetroll_core::CloudError;
use fleetroll_core::config::format_duration;
use fleetroll_remote::RemoteError;
use thiserror::Error;

pub type RotationResult<T> = Result<T, RotationError>;

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("no group to rotate: {0}")]
    GroupNotFound(String),

    #[error("member {member} did not reach InService after {attempts} attempts")]
    MemberNotReady { member: String, attempts: u32 },

    #[error("member {member} was still detaching after {attempts} attempts")]
    StillDetaching { member: String, attempts: u32 },

    #[error(
        "group {group} did not return to desired capacity within {} ({attempts} attempts)",
        format_duration(*.waited)
    )]
    CapacityTimeout {
        group: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("instance {instance} did not reach {expected} after {attempts} attempts")]
    InstanceStopTimeout {
        instance: String,
        expected: &'static str,
        attempts: u32,
    },

    #[error("failed to send shutdown to {member}: {source}")]
    Shutdown {
        member: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control plane error: {0}")]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_timeout_names_the_bound() {
        let err = RotationError::CapacityTimeout {
            group: "web".to_string(),
            attempts: 60,
            waited: Duration::from_secs(1800),
        };
        assert_eq!(
            err.to_string(),
            "group web did not return to desired capacity within 1800s (60 attempts)"
        );
    }
}
