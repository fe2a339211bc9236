//! Health-check hooks run before anything is mutated.

use fleetroll_core::StackDescription;
use tracing::info;

use crate::connectivity::ConnectivityValidator;
use crate::error::RemoteResult;
use crate::selector::{RemoteTarget, TargetSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Critical,
}

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    /// Extra lines shown under the message.
    pub detail: Option<String>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

/// Select a target and verify the remote shell reaches it.
pub async fn preflight(
    selector: &TargetSelector,
    validator: &ConnectivityValidator,
    stack: &StackDescription,
) -> RemoteResult<RemoteTarget> {
    let target = selector.choose(stack).await?;
    validator.verify(&target).await?;
    info!(stack = %stack.name, instance = %target.instance_id, "remote shell verified");
    Ok(target)
}

/// The `ssh` doctor check.
pub async fn check_connectivity(
    selector: &TargetSelector,
    validator: &ConnectivityValidator,
    stack: &StackDescription,
) -> CheckOutcome {
    match preflight(selector, validator, stack).await {
        Ok(target) => CheckOutcome {
            name: "ssh".to_string(),
            status: CheckStatus::Passed,
            message: format!(
                "Successfully opened SSH connection to an instance ({}).",
                target.instance_id
            ),
            detail: None,
        },
        Err(e) => CheckOutcome {
            name: "ssh".to_string(),
            status: CheckStatus::Critical,
            message: "SSH connection test failed, check your SSH settings".to_string(),
            detail: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fleetroll_core::sim::{FleetDescription, SimulatedCloud};
    use fleetroll_core::{ConnectivityConfig, ControlPlane, SshConfig};

    use super::*;
    use crate::executor::RemoteShell;
    use crate::sim::{ScriptedRun, SimulatedShell};

    const FLEET: &str = r#"
[[stacks]]
name = "web-prod"
[[stacks.resources]]
logical_id = "WebGroup"
resource_type = "AWS::AutoScaling::AutoScalingGroup"
physical_id = "web"

[[groups]]
name = "web"
desired_capacity = 1
max_size = 2
launch_configuration = "lc"
[[groups.members]]
id = "i-0a1"
launch_configuration = "lc"
address = "10.0.0.11"
"#;

    async fn run_check(scripts: Vec<ScriptedRun>) -> CheckOutcome {
        let cloud = Arc::new(SimulatedCloud::from_fleet(
            FleetDescription::from_toml_str(FLEET).unwrap(),
        ));
        let shell = Arc::new(SimulatedShell::new(cloud.clone()));
        for run in scripts {
            shell.script(run);
        }
        let ssh = SshConfig::default();
        let selector = TargetSelector::new(cloud.clone(), &ssh);
        let validator = ConnectivityValidator::new(
            RemoteShell::new(ssh, shell),
            ConnectivityConfig::default(),
        );
        let stack = cloud.describe_stack("web-prod").await.unwrap();
        check_connectivity(&selector, &validator, &stack).await
    }

    #[tokio::test(start_paused = true)]
    async fn passes_when_shell_answers() {
        let outcome = run_check(Vec::new()).await;
        assert!(outcome.passed());
        assert!(outcome.message.contains("i-0a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn critical_with_detail_when_shell_fails() {
        let outcome = run_check(vec![ScriptedRun::exit(255, "", "denied"); 3]).await;
        assert_eq!(outcome.status, CheckStatus::Critical);
        assert!(outcome.message.contains("check your SSH settings"));
        assert!(outcome.detail.unwrap().contains("exit status: 255"));
    }
}
