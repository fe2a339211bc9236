//! Domain types for groups, members, instances, stacks and change sets.
//!
//! These records are what the control plane hands back. They are plain
//! data: serializable so a fleet description can be loaded from TOML, and
//! cheap to clone so the rotation engine can snapshot them per poll.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a group member (and of the compute instance behind it).
pub type MemberId = String;

/// Identifier of a block storage volume.
pub type VolumeId = String;

/// Resource type under which groups appear in a stack description.
pub const GROUP_RESOURCE_TYPE: &str = "AWS::AutoScaling::AutoScalingGroup";

// ── Terminal-state accessor ────────────────────────────────────────

/// Normalized "is this already gone?" check.
///
/// Group-member records and compute-instance records report their state
/// differently; both resolve to this one question. A record that could not
/// be found (`None`) counts as terminal.
pub trait Lifecycle {
    fn is_terminal(&self) -> bool;
}

impl<T: Lifecycle> Lifecycle for Option<T> {
    fn is_terminal(&self) -> bool {
        match self {
            Some(inner) => inner.is_terminal(),
            None => true,
        }
    }
}

// ── Group ──────────────────────────────────────────────────────────

/// Lifecycle state of a member as reported by its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Detaching,
    Detached,
    Terminating,
    Terminated,
}

impl Lifecycle for LifecycleState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::InService => "InService",
            Self::Detaching => "Detaching",
            Self::Detached => "Detached",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

/// One unit in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub lifecycle: LifecycleState,
    pub launch_configuration: String,
}

impl Lifecycle for Member {
    fn is_terminal(&self) -> bool {
        self.lifecycle.is_terminal()
    }
}

/// A snapshot of an autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub desired_capacity: u32,
    pub max_size: u32,
    pub launch_configuration: String,
    pub members: Vec<Member>,
}

impl Group {
    /// Members whose launch configuration differs from the group's.
    pub fn outdated_members(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| m.launch_configuration != self.launch_configuration)
            .cloned()
            .collect()
    }

    /// Number of members currently in service.
    pub fn in_service_count(&self) -> u32 {
        self.members
            .iter()
            .filter(|m| m.lifecycle == LifecycleState::InService)
            .count() as u32
    }

    /// Whether the group is serving exactly its desired capacity.
    pub fn at_capacity(&self) -> bool {
        self.in_service_count() == self.desired_capacity
    }

    /// `"i-1 (InService), i-2 (Pending)"` style summary for progress output.
    pub fn member_summary(&self) -> String {
        self.members
            .iter()
            .map(|m| format!("{} ({})", m.id, m.lifecycle))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ── Compute instance ───────────────────────────────────────────────

/// Run state of the compute instance behind a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    /// Stopping or stopped: the instance is on its way down.
    pub fn is_halting(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl Lifecycle for InstanceState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// A compute instance as described by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: MemberId,
    pub state: InstanceState,
    /// Address used for remote shell access, if the instance has one.
    pub address: Option<String>,
    /// Volumes attached to the instance.
    pub volumes: Vec<VolumeId>,
}

impl InstanceInfo {
    /// Host to connect to: the address if known, otherwise the id.
    pub fn host(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.id)
    }
}

impl Lifecycle for InstanceInfo {
    fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ── Stack ──────────────────────────────────────────────────────────

/// One resource of a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResource {
    pub logical_id: String,
    pub resource_type: String,
    pub physical_id: String,
}

/// The live infrastructure description of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<StackResource>,
}

/// Why a group could not be resolved from a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupLookup {
    /// No group resource (matching the hint, if one was given).
    Missing,
    /// Several groups and no hint to pick between them.
    Ambiguous(Vec<String>),
}

impl StackDescription {
    /// Resources of the given type, in declaration order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a StackResource> + 'a {
        self.resources
            .iter()
            .filter(move |r| r.resource_type == resource_type)
    }

    /// Resolve the group resource, optionally by logical or physical id.
    pub fn group(&self, hint: Option<&str>) -> Result<&StackResource, GroupLookup> {
        let mut groups = self.resources_of_type(GROUP_RESOURCE_TYPE);
        match hint {
            Some(name) => groups
                .find(|r| r.logical_id == name || r.physical_id == name)
                .ok_or(GroupLookup::Missing),
            None => {
                let all: Vec<&StackResource> = groups.collect();
                match all.as_slice() {
                    [] => Err(GroupLookup::Missing),
                    [only] => Ok(*only),
                    many => Err(GroupLookup::Ambiguous(
                        many.iter().map(|r| r.logical_id.clone()).collect(),
                    )),
                }
            }
        }
    }
}

// ── Change set ─────────────────────────────────────────────────────

/// Status of a submitted change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSetStatus {
    Pending,
    CreateComplete,
    Failed,
}

impl ChangeSetStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CreateComplete | Self::Failed)
    }
}

impl fmt::Display for ChangeSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What a resource change does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Add,
    Modify,
    Remove,
    Import,
    Dynamic,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "Add",
            Self::Modify => "Modify",
            Self::Remove => "Remove",
            Self::Import => "Import",
            Self::Dynamic => "Dynamic",
        };
        f.write_str(s)
    }
}

/// Whether applying a change replaces the resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Replacement {
    True,
    Conditional,
    #[default]
    False,
}

/// Why a resource change was proposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum ChangeSource {
    ResourceReference { causing_entity: String },
    ParameterReference { causing_entity: String },
    DirectModification { attribute: String, name: String },
    Automatic,
}

/// One proposed resource change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub action: ChangeAction,
    pub logical_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub replacement: Replacement,
    #[serde(default)]
    pub details: Vec<ChangeSource>,
}

/// What describing a change set returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetDescription {
    pub name: String,
    pub stack_name: String,
    pub status: ChangeSetStatus,
    pub status_reason: Option<String>,
    #[serde(default)]
    pub changes: Vec<ResourceChange>,
}

/// A change set to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    pub name: String,
    pub stack_name: String,
    pub template_body: String,
}
