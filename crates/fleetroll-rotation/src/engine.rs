//! Rotation engine: drives one group rotation from start to cleanup.
//!
//! Members are cycled strictly one after another. The first cycling error
//! stops the loop, but teardown and capacity restoration still run before
//! the error is returned.
//!
//! Throttled control-plane calls are retried under `rotation.retry` before
//! they count as failures.

use std::sync::Arc;

use fleetroll_core::types::GroupLookup;
use fleetroll_core::{
    ControlPlane, Group, Lifecycle, LifecycleState, Member, ProgressSink, RetryingControlPlane,
    RotationConfig, StackDescription,
};
use fleetroll_remote::{ConnectivityValidator, RemoteShell, TargetSelector, preflight};
use tracing::{debug, info, warn};

use crate::error::{RotationError, RotationResult};
use crate::session::{RotationReport, RotationSession};
use crate::wait::{
    InstanceWait, MemberReadiness, wait_for_capacity, wait_for_member_in_service,
    wait_until_halting, wait_until_stopped,
};

/// Results of the teardown phase.
#[derive(Debug, Default)]
struct Teardown {
    terminated: Vec<String>,
    volumes_deleted: Vec<String>,
    volumes_failed: Vec<String>,
}

pub struct RotationEngine {
    cloud: Arc<dyn ControlPlane>,
    shell: RemoteShell,
    sink: Arc<dyn ProgressSink>,
    config: RotationConfig,
}

impl RotationEngine {
    pub fn new(
        cloud: Arc<dyn ControlPlane>,
        shell: RemoteShell,
        sink: Arc<dyn ProgressSink>,
        config: RotationConfig,
    ) -> Self {
        Self {
            cloud: Arc::new(RetryingControlPlane::new(cloud, config.retry.budget())),
            shell,
            sink,
            config,
        }
    }

    /// Verify remote access to the stack, then rotate its group.
    ///
    /// Nothing is mutated if the connectivity check fails.
    pub async fn rotate_stack(
        &self,
        stack: &StackDescription,
        validator: &ConnectivityValidator,
    ) -> RotationResult<RotationReport> {
        self.sink.start("Verifying remote access");
        let selector = TargetSelector::new(self.cloud.clone(), self.shell.ssh());
        match preflight(&selector, validator, stack).await {
            Ok(target) => self.sink.success(&format!(
                "Remote shell reachable on {}",
                target.instance_id
            )),
            Err(e) => {
                self.sink
                    .failure(&format!("Remote access check failed: {e}"));
                return Err(e.into());
            }
        }

        let group = self.group_for_stack(stack)?;
        self.rotate(&group).await
    }

    /// Physical name of the stack's group, honouring `ssh.group_name`.
    pub fn group_for_stack(&self, stack: &StackDescription) -> RotationResult<String> {
        let hint = self.shell.ssh().group_name.as_deref();
        stack
            .group(hint)
            .map(|resource| resource.physical_id.clone())
            .map_err(|lookup| {
                RotationError::GroupNotFound(match lookup {
                    GroupLookup::Missing => format!("stack {} has no matching group", stack.name),
                    GroupLookup::Ambiguous(names) => format!(
                        "stack {} has several groups ({}); set ssh.group_name",
                        stack.name,
                        names.join(", ")
                    ),
                })
            })
    }

    /// Replace every outdated member of `group`.
    pub async fn rotate(&self, group: &str) -> RotationResult<RotationReport> {
        self.sink
            .start(&format!("Rotating outdated instances in {group}"));

        let current = match self.cloud.describe_group(group).await {
            Ok(current) => current,
            Err(e) => {
                self.sink
                    .failure(&format!("Could not describe group {group}: {e}"));
                return Err(e.into());
            }
        };

        let outdated = current.outdated_members();
        if outdated.is_empty() {
            self.sink
                .success(&format!("All instances in {group} are up to date"));
            return Ok(RotationReport::up_to_date(group));
        }
        info!(
            %group,
            outdated = outdated.len(),
            launch_configuration = %current.launch_configuration,
            "starting rotation"
        );

        let mut session = RotationSession::new(group, current.desired_capacity, outdated);
        if let Err(e) = self.scale_up(&current, &mut session).await {
            self.sink
                .failure(&format!("Could not scale up {group}: {e}"));
            return Err(e);
        }

        let cycled = self.cycle_all(&mut session).await;
        let teardown = self.teardown(&session).await;
        let restored = self.restore_capacity(&session).await;

        let mut report = RotationReport::from_session(&session);
        report.terminated = teardown.terminated;
        report.volumes_deleted = teardown.volumes_deleted;
        report.volumes_failed = teardown.volumes_failed;
        report.capacity_restored = restored;

        match cycled {
            Ok(()) => {
                self.sink.success(&format!(
                    "Rotated {} of {} outdated instances in {group}",
                    report.shut_down.len(),
                    report.outdated.len()
                ));
                Ok(report)
            }
            Err(e) => {
                self.sink
                    .failure(&format!("Rotation of {group} failed: {e}"));
                Err(e)
            }
        }
    }

    async fn scale_up(&self, group: &Group, session: &mut RotationSession) -> RotationResult<()> {
        if group.desired_capacity >= group.max_size {
            self.sink.progress(&format!(
                "{} is at its maximum size ({}); rotating without spare capacity",
                group.name, group.max_size
            ));
            return Ok(());
        }

        let target = group.desired_capacity + 1;
        self.cloud.set_desired_capacity(&group.name, target).await?;
        session.mark_scaled_up();
        info!(group = %group.name, desired = target, "scaled up for rotation");
        self.sink
            .progress(&format!("Scaled {} up to {target} instances", group.name));
        Ok(())
    }

    async fn cycle_all(&self, session: &mut RotationSession) -> RotationResult<()> {
        let members: Vec<Member> = session.outdated().to_vec();
        for member in &members {
            self.cycle_member(session, member).await?;
        }
        Ok(())
    }

    async fn cycle_member(
        &self,
        session: &mut RotationSession,
        member: &Member,
    ) -> RotationResult<()> {
        let group = session.group().to_string();
        let id = member.id.as_str();
        self.sink.progress(&format!("Cycling instance {id}"));

        let readiness =
            match wait_for_member_in_service(self.cloud.as_ref(), id, self.config.member_ready())
                .await
            {
                Ok(readiness) => readiness,
                Err(e) => {
                    self.sink.failure(&format!("{id} never came into service: {e}"));
                    return Err(e);
                }
            };
        if readiness == MemberReadiness::Gone {
            self.sink
                .progress(&format!("{id} is already terminated; skipping"));
            return Ok(());
        }

        let still_owned = match self.cloud.detach_member(&group, id, false).await {
            Ok(()) => true,
            Err(e) if e.is_not_in_group() => {
                debug!(%group, member = %id, "member already outside the group");
                false
            }
            Err(e) => {
                self.sink
                    .failure(&format!("Failed to detach {id} from {group}: {e}"));
                self.reattach(&group, id).await;
                return Err(e.into());
            }
        };
        self.sink.progress(&format!("Detached {id} from {group}"));

        if let Err(e) = wait_for_capacity(
            self.cloud.as_ref(),
            &group,
            self.sink.as_ref(),
            self.config.capacity(),
        )
        .await
        {
            self.sink.failure(&format!(
                "{group} did not return to capacity after detaching {id}: {e}"
            ));
            if still_owned {
                self.reattach(&group, id).await;
            }
            return Err(e);
        }

        if !still_owned {
            self.sink.progress(&format!(
                "{id} is no longer part of {group}; leaving it alone"
            ));
            return Ok(());
        }

        self.collect_volumes(session, id).await;

        if self.shutdown(id).await? {
            session.record_shutdown(id);
            self.sink.progress(&format!("{id} has stopped"));
        }
        Ok(())
    }

    /// Best effort: a failed lookup only means the volumes are left behind.
    async fn collect_volumes(&self, session: &mut RotationSession, id: &str) {
        match self.cloud.describe_instance(id).await {
            Ok(Some(info)) if !info.is_terminal() => {
                debug!(member = %id, volumes = ?info.volumes, "collected volumes");
                session.collect_volumes(info.volumes);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(member = %id, error = %e, "failed to list volumes");
                self.sink
                    .failure(&format!("Could not list volumes of {id}: {e}"));
            }
        }
    }

    /// Send the shutdown command and wait for the instance to stop.
    ///
    /// Returns false if the instance was already gone. The command's exit
    /// status is not checked: the connection usually drops mid-shutdown.
    async fn shutdown(&self, id: &str) -> RotationResult<bool> {
        let info = self.cloud.describe_instance(id).await?;
        let Some(info) = info.filter(|i| !i.is_terminal()) else {
            debug!(member = %id, "instance already gone; no shutdown needed");
            return Ok(false);
        };

        self.sink.progress(&format!("Shutting down {id}"));
        let output = self
            .shell
            .exec(&self.config.shutdown_command, info.host())
            .await
            .map_err(|source| RotationError::Shutdown {
                member: id.to_string(),
                source,
            })?;
        debug!(member = %id, exit_status = ?output.exit_status, "shutdown sent");

        let stopped =
            match wait_until_stopped(self.cloud.as_ref(), id, self.config.instance_stop()).await {
                Ok(stopped) => stopped,
                Err(e) => {
                    self.sink.failure(&format!("{id} did not stop: {e}"));
                    return Err(e);
                }
            };
        Ok(matches!(stopped, InstanceWait::Reached(_)))
    }

    /// Put a member back after a failed detach. Failures are logged; the
    /// caller propagates the original error.
    async fn reattach(&self, group: &str, id: &str) {
        match self.try_reattach(group, id).await {
            Ok(true) => self
                .sink
                .progress(&format!("Re-attached {id} to {group}")),
            Ok(false) => debug!(%group, member = %id, "nothing to re-attach"),
            Err(e) => {
                warn!(%group, member = %id, error = %e, "re-attach failed");
                self.sink
                    .failure(&format!("Failed to re-attach {id} to {group}: {e}"));
            }
        }
    }

    async fn try_reattach(&self, group: &str, id: &str) -> RotationResult<bool> {
        let budget = self.config.member_ready();
        let attempts = budget.attempts.max(1);
        for attempt in 1..=attempts {
            let Some(member) = self.cloud.describe_member(id).await? else {
                return Ok(false);
            };
            if member.is_terminal() {
                return Ok(false);
            }
            if member.lifecycle != LifecycleState::Detaching {
                self.cloud.attach_member(group, id).await?;
                return Ok(true);
            }
            debug!(member = %id, attempt, "waiting for detach to finish before re-attaching");
            if attempt < attempts {
                tokio::time::sleep(budget.delay).await;
            }
        }
        Err(RotationError::StillDetaching {
            member: id.to_string(),
            attempts,
        })
    }

    async fn teardown(&self, session: &RotationSession) -> Teardown {
        let mut result = Teardown::default();
        if session.shut_down().is_empty() && session.volumes().is_empty() {
            return result;
        }
        self.sink
            .start(&format!("Cleaning up after rotating {}", session.group()));

        for id in session.shut_down() {
            match self.terminate(id).await {
                Ok(true) => {
                    self.sink.progress(&format!("Terminated {id}"));
                    result.terminated.push(id.clone());
                }
                Ok(false) => debug!(member = %id, "already gone; not terminating"),
                Err(e) => {
                    warn!(member = %id, error = %e, "terminate failed");
                    self.sink
                        .failure(&format!("Failed to terminate {id}: {e}"));
                }
            }
        }

        for volume in session.volumes() {
            match self.cloud.delete_volume(volume).await {
                Ok(()) => {
                    self.sink.progress(&format!("Deleted volume {volume}"));
                    result.volumes_deleted.push(volume.clone());
                }
                Err(e) => {
                    warn!(%volume, error = %e, "volume deletion failed");
                    self.sink
                        .failure(&format!("Failed to delete volume {volume}: {e}"));
                    result.volumes_failed.push(volume.clone());
                }
            }
        }

        result
    }

    /// Terminate a shut-down member once it has fully stopped.
    async fn terminate(&self, id: &str) -> RotationResult<bool> {
        if self.cloud.describe_instance(id).await?.is_terminal() {
            return Ok(false);
        }
        let budget = self.config.instance_stop();
        if wait_until_halting(self.cloud.as_ref(), id, budget).await? == InstanceWait::Gone {
            return Ok(false);
        }
        if wait_until_stopped(self.cloud.as_ref(), id, budget).await? == InstanceWait::Gone {
            return Ok(false);
        }
        self.cloud.terminate_instance(id).await?;
        Ok(true)
    }

    /// Give back the instance added by `scale_up`. Never fails the rotation.
    async fn restore_capacity(&self, session: &RotationSession) -> bool {
        if !session.scaled_up() {
            return false;
        }
        let group = session.group();
        let restored = async {
            let current = self.cloud.describe_group(group).await?;
            let target = current.desired_capacity.saturating_sub(1);
            self.cloud.set_desired_capacity(group, target).await?;
            Ok::<_, RotationError>(target)
        }
        .await;

        match restored {
            Ok(target) => {
                info!(%group, desired = target, initial = session.initial_desired(), "capacity restored");
                self.sink
                    .progress(&format!("Scaled {group} back down to {target} instances"));
                true
            }
            Err(e) => {
                warn!(%group, error = %e, "failed to restore desired capacity");
                self.sink
                    .failure(&format!("Failed to restore desired capacity of {group}: {e}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use fleetroll_core::sim::{FleetDescription, SimCall, SimOp, SimulatedCloud};
    use fleetroll_core::{CloudError, InstanceState, RecordingSink, SshConfig};
    use fleetroll_remote::SimulatedShell;

    use super::*;

    const FLEET: &str = r#"
[[groups]]
name = "web"
desired_capacity = 1
max_size = 2
launch_configuration = "lc-v2"
[[groups.members]]
id = "i-a"
launch_configuration = "lc-v1"
address = "10.0.0.11"
state = "stopped"
volumes = ["vol-a"]
[[groups.members]]
id = "i-gone"
launch_configuration = "lc-v1"
state = "terminated"
volumes = ["vol-gone"]
"#;

    fn engine() -> (Arc<SimulatedCloud>, Arc<RecordingSink>, RotationEngine) {
        let cloud = Arc::new(SimulatedCloud::from_fleet(
            FleetDescription::from_toml_str(FLEET).unwrap(),
        ));
        let shell = Arc::new(SimulatedShell::new(cloud.clone()));
        let sink = Arc::new(RecordingSink::new());
        let engine = RotationEngine::new(
            cloud.clone(),
            RemoteShell::new(SshConfig::default(), shell),
            sink.clone(),
            RotationConfig::default(),
        );
        (cloud, sink, engine)
    }

    fn terminations(cloud: &SimulatedCloud) -> Vec<String> {
        cloud
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SimCall::TerminateInstance(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_skips_terminated_and_unknown_members() {
        let (cloud, _, engine) = engine();
        let mut session = RotationSession::new("web", 1, Vec::new());
        for id in ["i-a", "i-gone", "i-missing"] {
            session.record_shutdown(id);
        }

        let teardown = engine.teardown(&session).await;
        assert_eq!(teardown.terminated, ["i-a"]);
        assert_eq!(terminations(&cloud), ["i-a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_volume_does_not_stop_the_rest() {
        let (cloud, sink, engine) = engine();
        cloud.fail_on(
            SimOp::DeleteVolume,
            "vol-a",
            CloudError::Api("VolumeInUse".to_string()),
        );
        let mut session = RotationSession::new("web", 1, Vec::new());
        session.collect_volumes(vec!["vol-a".to_string(), "vol-gone".to_string()]);

        let teardown = engine.teardown(&session).await;
        assert_eq!(teardown.volumes_failed, ["vol-a"]);
        assert_eq!(teardown.volumes_deleted, ["vol-gone"]);
        assert!(!cloud.volume_exists("vol-gone"));
        assert!(sink.failures().iter().any(|m| m.contains("vol-a")));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_is_skipped_without_scale_up() {
        let (cloud, _, engine) = engine();
        let session = RotationSession::new("web", 1, Vec::new());
        assert!(!engine.restore_capacity(&session).await);
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_failure_is_reported_not_raised() {
        let (cloud, sink, engine) = engine();
        cloud.fail_next(
            SimOp::SetDesiredCapacity,
            CloudError::Api("group is being updated".to_string()),
        );
        let mut session = RotationSession::new("web", 1, Vec::new());
        session.mark_scaled_up();

        assert!(!engine.restore_capacity(&session).await);
        assert!(sink.mentions("Failed to restore desired capacity of web"));
    }

    #[tokio::test(start_paused = true)]
    async fn reattach_waits_for_detaching_member() {
        let (cloud, _, engine) = engine();
        cloud.set_instance_state("i-a", InstanceState::Running);
        cloud.set_member_lifecycle("i-a", LifecycleState::Detaching);

        let reattach = engine.try_reattach("web", "i-a");
        let settle = async {
            tokio::time::sleep(std::time::Duration::from_secs(25)).await;
            cloud.set_member_lifecycle("i-a", LifecycleState::Detached);
        };
        let (attached, ()) = tokio::join!(reattach, settle);

        assert!(attached.unwrap());
        assert!(cloud.calls().contains(&SimCall::AttachMember {
            group: "web".to_string(),
            member: "i-a".to_string(),
        }));
    }

    #[test]
    fn group_name_comes_from_the_stack() {
        let (_, _, engine) = engine();
        let stack: StackDescription = serde_json::from_str(
            r#"{"name": "web-prod", "resources": [
                {"logical_id": "WebGroup", "resource_type": "AWS::AutoScaling::AutoScalingGroup", "physical_id": "web-prod-WebGroup-1X"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(engine.group_for_stack(&stack).unwrap(), "web-prod-WebGroup-1X");

        let empty = StackDescription {
            name: "bare".to_string(),
            resources: Vec::new(),
        };
        assert!(matches!(
            engine.group_for_stack(&empty),
            Err(RotationError::GroupNotFound(_))
        ));
    }
}
