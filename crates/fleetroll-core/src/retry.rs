//! Retry of transient control-plane errors.
//!
//! Throttling is retried with a fixed pause up to a bounded number of
//! attempts. Any other error, or the last transient one, is returned as is.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cloud::{CloudResult, ControlPlane};
use crate::config::PollBudget;
use crate::types::*;

/// Run `call` until it succeeds, fails permanently, or `budget` runs out.
pub async fn retry_transient<T, F, Fut>(
    budget: PollBudget,
    operation: &str,
    mut call: F,
) -> CloudResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CloudResult<T>>,
{
    let attempts = budget.attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(operation, attempt, attempts, error = %e, "transient control-plane error, retrying");
                tokio::time::sleep(budget.delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// A `ControlPlane` whose every call goes through `retry_transient`.
pub struct RetryingControlPlane {
    inner: Arc<dyn ControlPlane>,
    budget: PollBudget,
}

impl RetryingControlPlane {
    pub fn new(inner: Arc<dyn ControlPlane>, budget: PollBudget) -> Self {
        Self { inner, budget }
    }
}

#[async_trait]
impl ControlPlane for RetryingControlPlane {
    async fn describe_group(&self, group: &str) -> CloudResult<Group> {
        retry_transient(self.budget, "describe_group", || {
            self.inner.describe_group(group)
        })
        .await
    }

    async fn list_members(&self, group: &str) -> CloudResult<Vec<Member>> {
        retry_transient(self.budget, "list_members", || self.inner.list_members(group)).await
    }

    async fn describe_member(&self, member: &str) -> CloudResult<Option<Member>> {
        retry_transient(self.budget, "describe_member", || {
            self.inner.describe_member(member)
        })
        .await
    }

    async fn detach_member(
        &self,
        group: &str,
        member: &str,
        decrement_desired_capacity: bool,
    ) -> CloudResult<()> {
        retry_transient(self.budget, "detach_member", || {
            self.inner
                .detach_member(group, member, decrement_desired_capacity)
        })
        .await
    }

    async fn attach_member(&self, group: &str, member: &str) -> CloudResult<()> {
        retry_transient(self.budget, "attach_member", || {
            self.inner.attach_member(group, member)
        })
        .await
    }

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> CloudResult<()> {
        retry_transient(self.budget, "set_desired_capacity", || {
            self.inner.set_desired_capacity(group, capacity)
        })
        .await
    }

    async fn terminate_instance(&self, instance: &str) -> CloudResult<()> {
        retry_transient(self.budget, "terminate_instance", || {
            self.inner.terminate_instance(instance)
        })
        .await
    }

    async fn describe_instance(&self, instance: &str) -> CloudResult<Option<InstanceInfo>> {
        retry_transient(self.budget, "describe_instance", || {
            self.inner.describe_instance(instance)
        })
        .await
    }

    async fn delete_volume(&self, volume: &str) -> CloudResult<()> {
        retry_transient(self.budget, "delete_volume", || {
            self.inner.delete_volume(volume)
        })
        .await
    }

    async fn describe_stack(&self, stack: &str) -> CloudResult<StackDescription> {
        retry_transient(self.budget, "describe_stack", || {
            self.inner.describe_stack(stack)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::cloud::CloudError;
    use crate::sim::{FleetDescription, SimCall, SimOp, SimulatedCloud};

    const FLEET: &str = r#"
[[groups]]
name = "web"
desired_capacity = 1
max_size = 2
launch_configuration = "lc-v2"
[[groups.members]]
id = "i-a"
launch_configuration = "lc-v2"
"#;

    fn cloud() -> Arc<SimulatedCloud> {
        Arc::new(SimulatedCloud::from_fleet(
            FleetDescription::from_toml_str(FLEET).unwrap(),
        ))
    }

    fn throttled() -> CloudError {
        CloudError::Throttled("Rate exceeded".to_string())
    }

    fn budget(attempts: u32) -> PollBudget {
        PollBudget::new(attempts, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_is_absorbed_within_budget() {
        let sim = cloud();
        sim.fail_next(SimOp::DescribeMember, throttled());
        sim.fail_next(SimOp::DescribeMember, throttled());
        let cloud = RetryingControlPlane::new(sim.clone(), budget(3));

        let started = Instant::now();
        let member = cloud.describe_member("i-a").await.unwrap();

        assert_eq!(member.map(|m| m.id), Some("i-a".to_string()));
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn last_transient_error_is_returned_when_budget_runs_out() {
        let sim = cloud();
        for _ in 0..3 {
            sim.fail_next(SimOp::SetDesiredCapacity, throttled());
        }
        let cloud = RetryingControlPlane::new(sim.clone(), budget(2));

        let err = cloud.set_desired_capacity("web", 2).await.unwrap_err();

        assert!(matches!(err, CloudError::Throttled(_)));
        let attempts = sim
            .calls()
            .iter()
            .filter(|c| matches!(c, SimCall::SetDesiredCapacity { .. }))
            .count();
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let sim = cloud();
        sim.fail_next(SimOp::DeleteVolume, CloudError::Api("VolumeInUse".to_string()));

        let started = Instant::now();
        let err = retry_transient(budget(5), "delete_volume", || sim.delete_volume("vol-a"))
            .await
            .unwrap_err();

        assert_eq!(err, CloudError::Api("VolumeInUse".to_string()));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
