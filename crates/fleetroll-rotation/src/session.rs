//! Per-invocation rotation state.

use fleetroll_core::{Member, MemberId, VolumeId};
use serde::Serialize;

/// What one rotation has done so far. Never persisted.
#[derive(Debug, Clone)]
pub struct RotationSession {
    group: String,
    initial_desired: u32,
    scaled_up: bool,
    outdated: Vec<Member>,
    shut_down: Vec<MemberId>,
    volumes: Vec<VolumeId>,
}

impl RotationSession {
    pub fn new(group: &str, initial_desired: u32, outdated: Vec<Member>) -> Self {
        Self {
            group: group.to_string(),
            initial_desired,
            scaled_up: false,
            outdated,
            shut_down: Vec::new(),
            volumes: Vec::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn initial_desired(&self) -> u32 {
        self.initial_desired
    }

    /// Record that desired capacity was raised by one.
    ///
    /// The flag is set at most once per session; the engine decrements
    /// exactly once for it.
    pub fn mark_scaled_up(&mut self) {
        debug_assert!(!self.scaled_up, "scale-up recorded twice");
        self.scaled_up = true;
    }

    pub fn scaled_up(&self) -> bool {
        self.scaled_up
    }

    /// Outdated members found when the session started.
    pub fn outdated(&self) -> &[Member] {
        &self.outdated
    }

    pub fn record_shutdown(&mut self, member: &str) {
        if !self.shut_down.iter().any(|id| id == member) {
            self.shut_down.push(member.to_string());
        }
    }

    pub fn shut_down(&self) -> &[MemberId] {
        &self.shut_down
    }

    /// Queue volumes for deletion after teardown.
    pub fn collect_volumes(&mut self, volumes: impl IntoIterator<Item = VolumeId>) {
        for volume in volumes {
            if !self.volumes.contains(&volume) {
                self.volumes.push(volume);
            }
        }
    }

    pub fn volumes(&self) -> &[VolumeId] {
        &self.volumes
    }
}

/// Summary of a finished rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub group: String,
    pub outdated: Vec<MemberId>,
    pub shut_down: Vec<MemberId>,
    pub terminated: Vec<MemberId>,
    pub volumes_deleted: Vec<VolumeId>,
    pub volumes_failed: Vec<VolumeId>,
    pub scaled_up: bool,
    pub capacity_restored: bool,
}

impl RotationReport {
    /// Report for a group with nothing to rotate.
    pub fn up_to_date(group: &str) -> Self {
        Self {
            group: group.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn from_session(session: &RotationSession) -> Self {
        Self {
            group: session.group.clone(),
            outdated: session.outdated.iter().map(|m| m.id.clone()).collect(),
            shut_down: session.shut_down.clone(),
            scaled_up: session.scaled_up,
            ..Default::default()
        }
    }
}
