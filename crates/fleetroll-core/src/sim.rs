//! In-memory control plane.
//!
//! `SimulatedCloud` keeps groups, members, instances, volumes, stacks and
//! change sets in memory and implements both control-plane traits over
//! them. Each time a group is observed it converges towards its desired
//! capacity: missing members are launched in service with the group's
//! current launch configuration, surplus ones are terminated (outdated
//! first). Mutating calls are recorded as `SimCall`s, and faults can be
//! queued per operation to exercise failure paths.
//!
//! A fleet is seeded from a `FleetDescription`, usually read from TOML:
//!
//! ```toml
//! [[stacks]]
//! name = "web-prod"
//! [[stacks.resources]]
//! logical_id = "WebGroup"
//! resource_type = "AWS::AutoScaling::AutoScalingGroup"
//! physical_id = "web-prod-WebGroup-1"
//!
//! [[groups]]
//! name = "web-prod-WebGroup-1"
//! desired_capacity = 2
//! max_size = 3
//! launch_configuration = "lc-v2"
//! [[groups.members]]
//! id = "i-0a1"
//! launch_configuration = "lc-v1"
//! address = "10.0.0.11"
//! volumes = ["vol-0a1"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cloud::{ChangeSetApi, CloudError, CloudResult, ControlPlane};
use crate::types::*;

const NO_CHANGES_REASON: &str =
    "The submitted information didn't contain changes. Submit different information to create a change set.";

// ── Fleet description ──────────────────────────────────────────────

/// Initial contents of a simulated cloud.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetDescription {
    pub stacks: Vec<StackDescription>,
    pub groups: Vec<GroupSpec>,
    pub change_sets: Vec<ChangeSetScript>,
}

impl FleetDescription {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub desired_capacity: u32,
    pub max_size: u32,
    pub launch_configuration: String,
    #[serde(default)]
    pub members: Vec<MemberSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSpec {
    pub id: MemberId,
    pub launch_configuration: String,
    #[serde(default = "default_lifecycle")]
    pub lifecycle: LifecycleState,
    #[serde(default = "default_instance_state")]
    pub state: InstanceState,
    pub address: Option<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeId>,
}

fn default_lifecycle() -> LifecycleState {
    LifecycleState::InService
}

fn default_instance_state() -> InstanceState {
    InstanceState::Running
}

/// How a change set with a given name behaves once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSetScript {
    pub stack_name: String,
    pub name: String,
    /// Status reached once settled.
    #[serde(default = "default_change_set_status")]
    pub status: ChangeSetStatus,
    pub status_reason: Option<String>,
    /// Describe calls that report `Pending` before the status settles.
    #[serde(default)]
    pub pending_polls: u32,
    /// Stay `Pending` forever.
    #[serde(default)]
    pub never_settles: bool,
    /// Delete attempts rejected with an invalid-status error first.
    #[serde(default)]
    pub delete_blocked_attempts: u32,
    #[serde(default)]
    pub changes: Vec<ResourceChange>,
}

fn default_change_set_status() -> ChangeSetStatus {
    ChangeSetStatus::CreateComplete
}

// ── Calls and faults ───────────────────────────────────────────────

/// Operations that faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    DescribeGroup,
    DescribeMember,
    DetachMember,
    AttachMember,
    SetDesiredCapacity,
    TerminateInstance,
    DescribeInstance,
    DeleteVolume,
    DescribeStack,
    CreateChangeSet,
    DescribeChangeSet,
    ExecuteChangeSet,
    DeleteChangeSet,
}

/// A recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    DetachMember {
        group: String,
        member: MemberId,
        decrement_desired_capacity: bool,
    },
    AttachMember {
        group: String,
        member: MemberId,
    },
    SetDesiredCapacity {
        group: String,
        capacity: u32,
    },
    TerminateInstance(MemberId),
    DeleteVolume(VolumeId),
    CreateChangeSet {
        stack: String,
        name: String,
    },
    DescribeChangeSet {
        stack: String,
        name: String,
    },
    ExecuteChangeSet {
        stack: String,
        name: String,
    },
    DeleteChangeSet {
        stack: String,
        name: String,
    },
}

#[derive(Debug)]
struct Fault {
    op: SimOp,
    target: Option<String>,
    error: CloudError,
}

// ── State ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct SimGroup {
    desired_capacity: u32,
    max_size: u32,
    launch_configuration: String,
    members: Vec<MemberId>,
    hold_capacity: bool,
}

#[derive(Debug)]
struct SimMember {
    lifecycle: LifecycleState,
    launch_configuration: String,
}

#[derive(Debug)]
struct SimChangeSet {
    script: ChangeSetScript,
    polls: u32,
    executed: bool,
}

impl SimChangeSet {
    fn status(&self) -> ChangeSetStatus {
        if !self.script.never_settles && self.polls > self.script.pending_polls {
            self.script.status
        } else {
            ChangeSetStatus::Pending
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    groups: BTreeMap<String, SimGroup>,
    members: BTreeMap<MemberId, SimMember>,
    instances: BTreeMap<MemberId, InstanceInfo>,
    volumes: BTreeSet<VolumeId>,
    stacks: BTreeMap<String, StackDescription>,
    scripts: BTreeMap<(String, String), ChangeSetScript>,
    change_sets: BTreeMap<(String, String), SimChangeSet>,
    faults: Vec<Fault>,
    calls: Vec<SimCall>,
    launched: u32,
}

impl SimState {
    fn take_fault(&mut self, op: SimOp, target: &str) -> CloudResult<()> {
        let hit = self
            .faults
            .iter()
            .position(|f| f.op == op && f.target.as_deref().is_none_or(|t| t == target));
        match hit {
            Some(idx) => Err(self.faults.remove(idx).error),
            None => Ok(()),
        }
    }

    fn group_mut(&mut self, name: &str) -> CloudResult<&mut SimGroup> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("group {name}")))
    }

    /// Launch or terminate members until the group matches its desired capacity.
    fn converge(&mut self, name: &str) {
        let Self {
            groups,
            members,
            instances,
            volumes,
            launched,
            ..
        } = self;
        let Some(group) = groups.get_mut(name) else {
            return;
        };

        group.members.retain(|id| {
            members
                .get(id)
                .is_some_and(|m| m.lifecycle != LifecycleState::Terminated)
        });

        let active: Vec<MemberId> = group
            .members
            .iter()
            .filter(|id| {
                members.get(*id).is_some_and(|m| {
                    matches!(m.lifecycle, LifecycleState::Pending | LifecycleState::InService)
                })
            })
            .cloned()
            .collect();
        let desired = group.desired_capacity as usize;

        if active.len() < desired && !group.hold_capacity {
            for _ in active.len()..desired {
                *launched += 1;
                let id = format!("i-sim{:04}", *launched);
                let volume = format!("vol-sim{:04}", *launched);
                members.insert(
                    id.clone(),
                    SimMember {
                        lifecycle: LifecycleState::InService,
                        launch_configuration: group.launch_configuration.clone(),
                    },
                );
                instances.insert(
                    id.clone(),
                    InstanceInfo {
                        id: id.clone(),
                        state: InstanceState::Running,
                        address: Some(format!("10.0.1.{}", 10 + *launched)),
                        volumes: vec![volume.clone()],
                    },
                );
                volumes.insert(volume);
                debug!(group = %name, member = %id, "simulated launch");
                group.members.push(id);
            }
        } else if active.len() > desired {
            let mut surplus: Vec<MemberId> = active
                .iter()
                .filter(|id| {
                    members
                        .get(*id)
                        .is_some_and(|m| m.launch_configuration != group.launch_configuration)
                })
                .cloned()
                .collect();
            let current: Vec<MemberId> = active
                .iter()
                .filter(|id| !surplus.contains(*id))
                .cloned()
                .collect();
            surplus.extend(current);
            surplus.truncate(active.len() - desired);

            for id in &surplus {
                if let Some(member) = members.get_mut(id) {
                    member.lifecycle = LifecycleState::Terminated;
                }
                if let Some(instance) = instances.get_mut(id) {
                    instance.state = InstanceState::Terminated;
                }
                debug!(group = %name, member = %id, "simulated scale-in");
            }
            group.members.retain(|id| !surplus.contains(id));
        }
    }

    fn snapshot(&self, name: &str) -> CloudResult<Group> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| CloudError::NotFound(format!("group {name}")))?;
        let members = group
            .members
            .iter()
            .filter_map(|id| {
                self.members.get(id).map(|m| Member {
                    id: id.clone(),
                    lifecycle: m.lifecycle,
                    launch_configuration: m.launch_configuration.clone(),
                })
            })
            .collect();
        Ok(Group {
            name: name.to_string(),
            desired_capacity: group.desired_capacity,
            max_size: group.max_size,
            launch_configuration: group.launch_configuration.clone(),
            members,
        })
    }

    fn change_set_mut(&mut self, name: &str, stack: &str) -> CloudResult<&mut SimChangeSet> {
        self.change_sets
            .get_mut(&(stack.to_string(), name.to_string()))
            .ok_or_else(|| CloudError::NotFound(format!("change set {name} in stack {stack}")))
    }
}

// ── Simulated cloud ────────────────────────────────────────────────

/// In-memory implementation of `ControlPlane` and `ChangeSetApi`.
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    state: Mutex<SimState>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fleet(fleet: FleetDescription) -> Self {
        let mut state = SimState::default();

        for stack in fleet.stacks {
            state.stacks.insert(stack.name.clone(), stack);
        }

        for spec in fleet.groups {
            let mut group = SimGroup {
                desired_capacity: spec.desired_capacity,
                max_size: spec.max_size,
                launch_configuration: spec.launch_configuration,
                members: Vec::new(),
                hold_capacity: false,
            };
            for member in spec.members {
                if !matches!(
                    member.lifecycle,
                    LifecycleState::Detached | LifecycleState::Terminated
                ) {
                    group.members.push(member.id.clone());
                }
                state.volumes.extend(member.volumes.iter().cloned());
                state.instances.insert(
                    member.id.clone(),
                    InstanceInfo {
                        id: member.id.clone(),
                        state: member.state,
                        address: member.address,
                        volumes: member.volumes,
                    },
                );
                state.members.insert(
                    member.id,
                    SimMember {
                        lifecycle: member.lifecycle,
                        launch_configuration: member.launch_configuration,
                    },
                );
            }
            state.groups.insert(spec.name, group);
        }

        for script in fleet.change_sets {
            state
                .scripts
                .insert((script.stack_name.clone(), script.name.clone()), script);
        }

        Self {
            state: Mutex::new(state),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::from_fleet(FleetDescription::from_file(path)?))
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next call to `op` with `error`.
    pub fn fail_next(&self, op: SimOp, error: CloudError) {
        self.state().faults.push(Fault {
            op,
            target: None,
            error,
        });
    }

    /// Fail the next call to `op` that targets `target` with `error`.
    pub fn fail_on(&self, op: SimOp, target: &str, error: CloudError) {
        self.state().faults.push(Fault {
            op,
            target: Some(target.to_string()),
            error,
        });
    }

    /// Stop (or resume) launching replacement members for a group.
    pub fn hold_capacity(&self, group: &str, hold: bool) {
        if let Some(g) = self.state().groups.get_mut(group) {
            g.hold_capacity = hold;
        }
    }

    pub fn set_member_lifecycle(&self, member: &str, lifecycle: LifecycleState) {
        if let Some(m) = self.state().members.get_mut(member) {
            m.lifecycle = lifecycle;
        }
    }

    pub fn set_instance_state(&self, instance: &str, state: InstanceState) {
        if let Some(i) = self.state().instances.get_mut(instance) {
            i.state = state;
        }
    }

    /// Begin stopping the running instance reachable at `host` (address or id).
    ///
    /// Returns false if no running instance matches.
    pub fn halt_instance(&self, host: &str) -> bool {
        let mut state = self.state();
        let found = state.instances.values_mut().find(|i| {
            i.state == InstanceState::Running && (i.id == host || i.address.as_deref() == Some(host))
        });
        match found {
            Some(instance) => {
                debug!(instance = %instance.id, "simulated shutdown");
                instance.state = InstanceState::Stopping;
                true
            }
            None => false,
        }
    }

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    /// The group as stored, without converging it first.
    pub fn group(&self, name: &str) -> Option<Group> {
        self.state().snapshot(name).ok()
    }

    pub fn instance(&self, id: &str) -> Option<InstanceInfo> {
        self.state().instances.get(id).cloned()
    }

    pub fn volume_exists(&self, volume: &str) -> bool {
        self.state().volumes.contains(volume)
    }

    pub fn change_set_executed(&self, name: &str, stack: &str) -> bool {
        self.state()
            .change_sets
            .get(&(stack.to_string(), name.to_string()))
            .is_some_and(|cs| cs.executed)
    }

    pub fn change_set_exists(&self, name: &str, stack: &str) -> bool {
        self.state()
            .change_sets
            .contains_key(&(stack.to_string(), name.to_string()))
    }
}

#[async_trait]
impl ControlPlane for SimulatedCloud {
    async fn describe_group(&self, group: &str) -> CloudResult<Group> {
        let mut state = self.state();
        state.take_fault(SimOp::DescribeGroup, group)?;
        state.converge(group);
        state.snapshot(group)
    }

    async fn describe_member(&self, member: &str) -> CloudResult<Option<Member>> {
        let mut state = self.state();
        state.take_fault(SimOp::DescribeMember, member)?;
        Ok(state
            .members
            .get(member)
            .filter(|m| m.lifecycle != LifecycleState::Terminated)
            .map(|m| Member {
                id: member.to_string(),
                lifecycle: m.lifecycle,
                launch_configuration: m.launch_configuration.clone(),
            }))
    }

    async fn detach_member(
        &self,
        group: &str,
        member: &str,
        decrement_desired_capacity: bool,
    ) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::DetachMember {
            group: group.to_string(),
            member: member.to_string(),
            decrement_desired_capacity,
        });
        state.take_fault(SimOp::DetachMember, member)?;

        let g = state.group_mut(group)?;
        let Some(pos) = g.members.iter().position(|id| id == member) else {
            return Err(CloudError::Validation(format!(
                "The instance {member} is not part of Auto Scaling group {group}."
            )));
        };
        g.members.remove(pos);
        if decrement_desired_capacity {
            g.desired_capacity = g.desired_capacity.saturating_sub(1);
        }
        if let Some(m) = state.members.get_mut(member) {
            m.lifecycle = LifecycleState::Detached;
        }
        Ok(())
    }

    async fn attach_member(&self, group: &str, member: &str) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::AttachMember {
            group: group.to_string(),
            member: member.to_string(),
        });
        state.take_fault(SimOp::AttachMember, member)?;

        let attachable = state
            .members
            .get(member)
            .is_some_and(|m| !m.lifecycle.is_terminal())
            && state
                .instances
                .get(member)
                .is_some_and(|i| i.state == InstanceState::Running);
        if !attachable {
            return Err(CloudError::Validation(format!(
                "Instance {member} is not in a state that can be attached"
            )));
        }

        let g = state.group_mut(group)?;
        if !g.members.iter().any(|id| id == member) {
            g.members.push(member.to_string());
        }
        if let Some(m) = state.members.get_mut(member) {
            m.lifecycle = LifecycleState::InService;
        }
        Ok(())
    }

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::SetDesiredCapacity {
            group: group.to_string(),
            capacity,
        });
        state.take_fault(SimOp::SetDesiredCapacity, group)?;

        let g = state.group_mut(group)?;
        if capacity > g.max_size {
            return Err(CloudError::Validation(format!(
                "New SetDesiredCapacity value {capacity} is above max value {} for the AutoScalingGroup.",
                g.max_size
            )));
        }
        g.desired_capacity = capacity;
        Ok(())
    }

    async fn terminate_instance(&self, instance: &str) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::TerminateInstance(instance.to_string()));
        state.take_fault(SimOp::TerminateInstance, instance)?;

        let Some(info) = state.instances.get_mut(instance) else {
            return Err(CloudError::NotFound(format!("instance {instance}")));
        };
        info.state = InstanceState::Terminated;
        if let Some(m) = state.members.get_mut(instance) {
            m.lifecycle = LifecycleState::Terminated;
        }
        for group in state.groups.values_mut() {
            group.members.retain(|id| id != instance);
        }
        Ok(())
    }

    async fn describe_instance(&self, instance: &str) -> CloudResult<Option<InstanceInfo>> {
        let mut state = self.state();
        state.take_fault(SimOp::DescribeInstance, instance)?;

        let Some(info) = state.instances.get_mut(instance) else {
            return Ok(None);
        };
        let observed = info.clone();
        // A stopping instance finishes stopping after it has been seen once.
        if info.state == InstanceState::Stopping {
            info.state = InstanceState::Stopped;
        }
        Ok(Some(observed))
    }

    async fn delete_volume(&self, volume: &str) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::DeleteVolume(volume.to_string()));
        state.take_fault(SimOp::DeleteVolume, volume)?;

        if state.volumes.remove(volume) {
            Ok(())
        } else {
            Err(CloudError::NotFound(format!("volume {volume}")))
        }
    }

    async fn describe_stack(&self, stack: &str) -> CloudResult<StackDescription> {
        let mut state = self.state();
        state.take_fault(SimOp::DescribeStack, stack)?;
        state
            .stacks
            .get(stack)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("stack {stack}")))
    }
}

#[async_trait]
impl ChangeSetApi for SimulatedCloud {
    async fn create_change_set(&self, request: &ChangeSetRequest) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::CreateChangeSet {
            stack: request.stack_name.clone(),
            name: request.name.clone(),
        });
        state.take_fault(SimOp::CreateChangeSet, &request.name)?;

        if !state.stacks.contains_key(&request.stack_name) {
            return Err(CloudError::Validation(format!(
                "Stack [{}] does not exist",
                request.stack_name
            )));
        }
        let key = (request.stack_name.clone(), request.name.clone());
        if state.change_sets.contains_key(&key) {
            return Err(CloudError::Validation(format!(
                "ChangeSet [{}] already exists",
                request.name
            )));
        }

        let script = state.scripts.get(&key).cloned().unwrap_or_else(|| ChangeSetScript {
            stack_name: request.stack_name.clone(),
            name: request.name.clone(),
            status: ChangeSetStatus::Failed,
            status_reason: Some(NO_CHANGES_REASON.to_string()),
            pending_polls: 0,
            never_settles: false,
            delete_blocked_attempts: 0,
            changes: Vec::new(),
        });
        state.change_sets.insert(
            key,
            SimChangeSet {
                script,
                polls: 0,
                executed: false,
            },
        );
        Ok(())
    }

    async fn describe_change_set(
        &self,
        name: &str,
        stack: &str,
    ) -> CloudResult<ChangeSetDescription> {
        let mut state = self.state();
        state.calls.push(SimCall::DescribeChangeSet {
            stack: stack.to_string(),
            name: name.to_string(),
        });
        state.take_fault(SimOp::DescribeChangeSet, name)?;

        let cs = state.change_set_mut(name, stack)?;
        cs.polls += 1;
        let status = cs.status();
        let settled = status.is_terminal();
        Ok(ChangeSetDescription {
            name: name.to_string(),
            stack_name: stack.to_string(),
            status,
            status_reason: if settled {
                cs.script.status_reason.clone()
            } else {
                None
            },
            changes: if settled {
                cs.script.changes.clone()
            } else {
                Vec::new()
            },
        })
    }

    async fn execute_change_set(&self, name: &str, stack: &str) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::ExecuteChangeSet {
            stack: stack.to_string(),
            name: name.to_string(),
        });
        state.take_fault(SimOp::ExecuteChangeSet, name)?;

        let cs = state.change_set_mut(name, stack)?;
        if cs.status() != ChangeSetStatus::CreateComplete {
            return Err(CloudError::InvalidChangeSetStatus(format!(
                "ChangeSet [{name}] cannot be executed in its current status of [{}]",
                cs.status()
            )));
        }
        cs.executed = true;
        Ok(())
    }

    async fn delete_change_set(&self, name: &str, stack: &str) -> CloudResult<()> {
        let mut state = self.state();
        state.calls.push(SimCall::DeleteChangeSet {
            stack: stack.to_string(),
            name: name.to_string(),
        });
        state.take_fault(SimOp::DeleteChangeSet, name)?;

        let cs = state.change_set_mut(name, stack)?;
        if cs.script.delete_blocked_attempts > 0 {
            cs.script.delete_blocked_attempts -= 1;
            return Err(CloudError::InvalidChangeSetStatus(format!(
                "ChangeSet [{name}] cannot be deleted in its current status"
            )));
        }
        state
            .change_sets
            .remove(&(stack.to_string(), name.to_string()));
        Ok(())
    }
}
