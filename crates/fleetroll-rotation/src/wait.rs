//! Bounded polling loops.
//!
//! Every loop checks first and sleeps between checks, so a budget of
//! `n` attempts makes `n` observations and `n - 1` sleeps. Running out of
//! attempts is always a typed error.

use fleetroll_core::{
    ControlPlane, Group, InstanceState, Lifecycle, LifecycleState, PollBudget, ProgressSink,
};
use tracing::debug;

use crate::error::{RotationError, RotationResult};

/// Outcome of waiting for a member to come into service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberReadiness {
    InService,
    /// Terminating, terminated or no longer known.
    Gone,
}

/// Outcome of waiting for an instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceWait {
    Reached(InstanceState),
    /// Terminated or no longer known.
    Gone,
}

pub async fn wait_for_member_in_service(
    cloud: &dyn ControlPlane,
    member: &str,
    budget: PollBudget,
) -> RotationResult<MemberReadiness> {
    let attempts = budget.attempts.max(1);
    for attempt in 1..=attempts {
        let current = cloud.describe_member(member).await?;
        if current.is_terminal() {
            return Ok(MemberReadiness::Gone);
        }
        if current
            .as_ref()
            .is_some_and(|m| m.lifecycle == LifecycleState::InService)
        {
            return Ok(MemberReadiness::InService);
        }
        debug!(
            %member,
            attempt,
            lifecycle = ?current.map(|m| m.lifecycle),
            "waiting for member to be in service"
        );
        if attempt < attempts {
            tokio::time::sleep(budget.delay).await;
        }
    }
    Err(RotationError::MemberNotReady {
        member: member.to_string(),
        attempts,
    })
}

/// Poll until the group serves exactly its desired capacity.
///
/// Every poll reports the members and their states to `sink`.
pub async fn wait_for_capacity(
    cloud: &dyn ControlPlane,
    group: &str,
    sink: &dyn ProgressSink,
    budget: PollBudget,
) -> RotationResult<Group> {
    let attempts = budget.attempts.max(1);
    for attempt in 1..=attempts {
        let current = cloud.describe_group(group).await?;
        sink.progress(&format!("Instances: {}", current.member_summary()));
        if current.at_capacity() {
            return Ok(current);
        }
        debug!(
            %group,
            attempt,
            in_service = current.in_service_count(),
            desired = current.desired_capacity,
            "waiting for capacity"
        );
        if attempt < attempts {
            tokio::time::sleep(budget.delay).await;
        }
    }
    Err(RotationError::CapacityTimeout {
        group: group.to_string(),
        attempts,
        waited: budget.total(),
    })
}

/// Poll until the instance is stopping or stopped.
pub async fn wait_until_halting(
    cloud: &dyn ControlPlane,
    instance: &str,
    budget: PollBudget,
) -> RotationResult<InstanceWait> {
    wait_for_instance(cloud, instance, budget, "stopping", InstanceState::is_halting).await
}

/// Poll until the instance is fully stopped.
pub async fn wait_until_stopped(
    cloud: &dyn ControlPlane,
    instance: &str,
    budget: PollBudget,
) -> RotationResult<InstanceWait> {
    wait_for_instance(cloud, instance, budget, "stopped", |state| {
        *state == InstanceState::Stopped
    })
    .await
}

async fn wait_for_instance(
    cloud: &dyn ControlPlane,
    instance: &str,
    budget: PollBudget,
    expected: &'static str,
    reached: impl Fn(&InstanceState) -> bool,
) -> RotationResult<InstanceWait> {
    let attempts = budget.attempts.max(1);
    for attempt in 1..=attempts {
        let current = cloud.describe_instance(instance).await?;
        let Some(info) = current.filter(|i| !i.is_terminal()) else {
            return Ok(InstanceWait::Gone);
        };
        if reached(&info.state) {
            return Ok(InstanceWait::Reached(info.state));
        }
        debug!(%instance, attempt, state = %info.state, expected, "waiting for instance");
        if attempt < attempts {
            tokio::time::sleep(budget.delay).await;
        }
    }
    Err(RotationError::InstanceStopTimeout {
        instance: instance.to_string(),
        expected,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fleetroll_core::RecordingSink;
    use fleetroll_core::sim::{FleetDescription, SimulatedCloud};

    use super::*;

    const FLEET: &str = r#"
[[groups]]
name = "web"
desired_capacity = 2
max_size = 3
launch_configuration = "lc-v2"
[[groups.members]]
id = "i-a"
launch_configuration = "lc-v1"
address = "10.0.0.11"
[[groups.members]]
id = "i-b"
launch_configuration = "lc-v2"
lifecycle = "Pending"
"#;

    fn cloud() -> SimulatedCloud {
        SimulatedCloud::from_fleet(FleetDescription::from_toml_str(FLEET).unwrap())
    }

    fn budget(attempts: u32) -> PollBudget {
        PollBudget::new(attempts, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn in_service_member_is_ready_immediately() {
        let cloud = cloud();
        let readiness = wait_for_member_in_service(&cloud, "i-a", budget(3))
            .await
            .unwrap();
        assert_eq!(readiness, MemberReadiness::InService);
    }

    #[tokio::test(start_paused = true)]
    async fn terminating_or_unknown_member_is_gone() {
        let cloud = cloud();
        cloud.set_member_lifecycle("i-a", LifecycleState::Terminating);
        assert_eq!(
            wait_for_member_in_service(&cloud, "i-a", budget(3)).await.unwrap(),
            MemberReadiness::Gone
        );
        assert_eq!(
            wait_for_member_in_service(&cloud, "i-missing", budget(3)).await.unwrap(),
            MemberReadiness::Gone
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pending_member_exhausts_budget() {
        let cloud = cloud();
        let started = tokio::time::Instant::now();
        let err = wait_for_member_in_service(&cloud, "i-b", budget(4))
            .await
            .unwrap_err();
        assert!(matches!(err, RotationError::MemberNotReady { attempts: 4, .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_wait_reports_every_poll() {
        let cloud = cloud();
        let sink = RecordingSink::new();
        let err = wait_for_capacity(&cloud, "web", &sink, budget(3))
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::CapacityTimeout { attempts: 3, .. }));
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0].message(),
            "Instances: i-a (InService), i-b (Pending)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_reached_once_member_is_in_service() {
        let cloud = cloud();
        cloud.set_member_lifecycle("i-b", LifecycleState::InService);
        let sink = RecordingSink::new();
        let group = wait_for_capacity(&cloud, "web", &sink, budget(3))
            .await
            .unwrap();
        assert_eq!(group.in_service_count(), 2);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_follow_instance_state() {
        let cloud = cloud();
        assert!(matches!(
            wait_until_halting(&cloud, "i-a", budget(2)).await,
            Err(RotationError::InstanceStopTimeout { expected: "stopping", .. })
        ));

        cloud.set_instance_state("i-a", InstanceState::Stopping);
        assert_eq!(
            wait_until_halting(&cloud, "i-a", budget(2)).await.unwrap(),
            InstanceWait::Reached(InstanceState::Stopping)
        );
        assert_eq!(
            wait_until_stopped(&cloud, "i-a", budget(2)).await.unwrap(),
            InstanceWait::Reached(InstanceState::Stopped)
        );

        cloud.set_instance_state("i-a", InstanceState::Terminated);
        assert_eq!(
            wait_until_stopped(&cloud, "i-a", budget(2)).await.unwrap(),
            InstanceWait::Gone
        );
    }
}
