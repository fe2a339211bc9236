//! Connectivity target selection.
//!
//! Picks one member of a deployment's group that should accept a remote
//! shell. Selection only reads from the control plane.

use std::sync::Arc;

use fleetroll_core::types::GroupLookup;
use fleetroll_core::{ControlPlane, LifecycleState, MemberId, SshConfig, StackDescription};
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};

/// A member chosen for remote access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub instance_id: MemberId,
    /// Address to connect to; the instance id if it has no address.
    pub host: String,
}

pub struct TargetSelector {
    cloud: Arc<dyn ControlPlane>,
    group_hint: Option<String>,
    instance_override: Option<String>,
}

impl TargetSelector {
    pub fn new(cloud: Arc<dyn ControlPlane>, ssh: &SshConfig) -> Self {
        Self {
            cloud,
            group_hint: ssh.group_name.clone(),
            instance_override: ssh.instance.clone(),
        }
    }

    /// Choose exactly one in-service member of the stack's group.
    pub async fn choose(&self, stack: &StackDescription) -> RemoteResult<RemoteTarget> {
        if let Some(instance) = &self.instance_override {
            return self.resolve(instance).await;
        }

        let resource = stack
            .group(self.group_hint.as_deref())
            .map_err(|lookup| match lookup {
                GroupLookup::Missing => RemoteError::NoEligibleTarget(match &self.group_hint {
                    Some(hint) => format!("no group named {hint} in stack {}", stack.name),
                    None => format!("stack {} has no group", stack.name),
                }),
                GroupLookup::Ambiguous(names) => RemoteError::NoEligibleTarget(format!(
                    "stack {} has several groups ({}); set ssh.group_name",
                    stack.name,
                    names.join(", ")
                )),
            })?;

        let group = resource.physical_id.as_str();
        let members = self.cloud.list_members(group).await?;
        let member = members
            .iter()
            .find(|m| m.lifecycle == LifecycleState::InService)
            .ok_or_else(|| {
                RemoteError::NoEligibleTarget(format!("group {group} has no in-service members"))
            })?;

        debug!(%group, member = %member.id, "selected connectivity target");
        self.resolve(&member.id).await
    }

    async fn resolve(&self, instance: &str) -> RemoteResult<RemoteTarget> {
        let info = self
            .cloud
            .describe_instance(instance)
            .await?
            .ok_or_else(|| RemoteError::NoEligibleTarget(format!("instance {instance} not found")))?;
        Ok(RemoteTarget {
            instance_id: info.id.clone(),
            host: info.host().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use fleetroll_core::sim::{FleetDescription, SimulatedCloud};

    use super::*;

    const FLEET: &str = r#"
[[stacks]]
name = "web-prod"
[[stacks.resources]]
logical_id = "WebGroup"
resource_type = "AWS::AutoScaling::AutoScalingGroup"
physical_id = "web"
[[stacks.resources]]
logical_id = "Workers"
resource_type = "AWS::AutoScaling::AutoScalingGroup"
physical_id = "workers"

[[stacks]]
name = "empty"

[[groups]]
name = "web"
desired_capacity = 2
max_size = 3
launch_configuration = "lc-v2"
[[groups.members]]
id = "i-pending"
launch_configuration = "lc-v2"
lifecycle = "Pending"
[[groups.members]]
id = "i-ready"
launch_configuration = "lc-v2"
address = "10.0.0.12"

[[groups]]
name = "workers"
desired_capacity = 0
max_size = 1
launch_configuration = "lc-w"
"#;

    async fn setup() -> (Arc<SimulatedCloud>, StackDescription) {
        let cloud = Arc::new(SimulatedCloud::from_fleet(
            FleetDescription::from_toml_str(FLEET).unwrap(),
        ));
        let stack = cloud.describe_stack("web-prod").await.unwrap();
        (cloud, stack)
    }

    fn ssh(group: Option<&str>, instance: Option<&str>) -> SshConfig {
        SshConfig {
            group_name: group.map(str::to_string),
            instance: instance.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn picks_first_in_service_member_of_hinted_group() {
        let (cloud, stack) = setup().await;
        let selector = TargetSelector::new(cloud, &ssh(Some("WebGroup"), None));
        let target = selector.choose(&stack).await.unwrap();
        assert_eq!(
            target,
            RemoteTarget {
                instance_id: "i-ready".to_string(),
                host: "10.0.0.12".to_string()
            }
        );
    }

    #[tokio::test]
    async fn several_groups_without_hint_is_an_error() {
        let (cloud, stack) = setup().await;
        let selector = TargetSelector::new(cloud, &ssh(None, None));
        let err = selector.choose(&stack).await.unwrap_err();
        assert!(matches!(err, RemoteError::NoEligibleTarget(msg) if msg.contains("several groups")));
    }

    #[tokio::test]
    async fn empty_group_has_no_target() {
        let (cloud, stack) = setup().await;
        let selector = TargetSelector::new(cloud, &ssh(Some("Workers"), None));
        assert!(matches!(
            selector.choose(&stack).await,
            Err(RemoteError::NoEligibleTarget(_))
        ));
    }

    #[tokio::test]
    async fn unknown_hint_has_no_target() {
        let (cloud, _) = setup().await;
        let stack = cloud.describe_stack("empty").await.unwrap();
        let selector = TargetSelector::new(cloud, &ssh(Some("WebGroup"), None));
        assert!(matches!(
            selector.choose(&stack).await,
            Err(RemoteError::NoEligibleTarget(_))
        ));
    }

    #[tokio::test]
    async fn instance_override_skips_group_lookup() {
        let (cloud, stack) = setup().await;
        let selector = TargetSelector::new(cloud, &ssh(None, Some("i-pending")));
        let target = selector.choose(&stack).await.unwrap();
        assert_eq!(target.instance_id, "i-pending");
        assert_eq!(target.host, "i-pending");
    }
}
