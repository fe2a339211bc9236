//! Control-plane interface.
//!
//! Every cloud call fleetroll makes goes through one of two traits:
//! `ControlPlane` for groups, instances, volumes and stacks, and
//! `ChangeSetApi` for change sets. Lookups that can legitimately miss
//! return `Ok(None)` rather than `CloudError::NotFound`.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::*;

/// Result type alias for control-plane calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid change set status: {0}")]
    InvalidChangeSetStatus(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("control plane error: {0}")]
    Api(String),
}

impl CloudError {
    /// Whether retrying the same call after a pause may succeed.
    ///
    /// A change set in a non-deletable status is not transient here; the
    /// change-set discard loop handles it with its own budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    /// The provider's "member already outside the group" detach rejection.
    pub fn is_not_in_group(&self) -> bool {
        match self {
            Self::Validation(message) => message.contains("is not part of Auto Scaling group"),
            _ => false,
        }
    }
}

/// Group, instance, volume and stack operations.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Capacity, launch configuration and members of a group.
    async fn describe_group(&self, group: &str) -> CloudResult<Group>;

    /// Members of a group.
    async fn list_members(&self, group: &str) -> CloudResult<Vec<Member>> {
        Ok(self.describe_group(group).await?.members)
    }

    /// A single member, or `None` once the group no longer knows it.
    async fn describe_member(&self, member: &str) -> CloudResult<Option<Member>>;

    async fn detach_member(
        &self,
        group: &str,
        member: &str,
        decrement_desired_capacity: bool,
    ) -> CloudResult<()>;

    async fn attach_member(&self, group: &str, member: &str) -> CloudResult<()>;

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> CloudResult<()>;

    async fn terminate_instance(&self, instance: &str) -> CloudResult<()>;

    /// A compute instance, or `None` if the provider has no record of it.
    async fn describe_instance(&self, instance: &str) -> CloudResult<Option<InstanceInfo>>;

    async fn delete_volume(&self, volume: &str) -> CloudResult<()>;

    async fn describe_stack(&self, stack: &str) -> CloudResult<StackDescription>;
}

/// Change-set operations, scoped to a stack.
#[async_trait]
pub trait ChangeSetApi: Send + Sync {
    /// Submit a change set. Returns as soon as the request is accepted.
    async fn create_change_set(&self, request: &ChangeSetRequest) -> CloudResult<()>;

    async fn describe_change_set(&self, name: &str, stack: &str)
    -> CloudResult<ChangeSetDescription>;

    async fn execute_change_set(&self, name: &str, stack: &str) -> CloudResult<()>;

    async fn delete_change_set(&self, name: &str, stack: &str) -> CloudResult<()>;
}
