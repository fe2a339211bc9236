//! Subcommand implementations and the wiring they share.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use fleetroll_core::sim::SimulatedCloud;
use fleetroll_core::{FleetrollConfig, ProgressSink, RetryingControlPlane, TracingSink};
use fleetroll_remote::{
    ConnectivityValidator, ForkExecutor, RemoteExecutor, RemoteShell, SimulatedShell,
    TargetSelector,
};

use crate::sink::TerminalSink;
use crate::{ExecutorKind, LogFormat};

pub mod change_set;
pub mod doctor;
pub mod rotate;

/// Control plane, executor, sink and configuration for one invocation.
pub struct Context {
    pub cloud: Arc<SimulatedCloud>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub sink: Arc<dyn ProgressSink>,
    pub config: FleetrollConfig,
}

impl Context {
    pub fn new(
        fleet: &Path,
        config: FleetrollConfig,
        executor: ExecutorKind,
        log_format: LogFormat,
    ) -> anyhow::Result<Self> {
        let cloud = Arc::new(
            SimulatedCloud::from_file(fleet)
                .with_context(|| format!("failed to load fleet from {}", fleet.display()))?,
        );
        let executor: Arc<dyn RemoteExecutor> = match executor {
            ExecutorKind::Simulated => Arc::new(SimulatedShell::new(cloud.clone())),
            ExecutorKind::Ssh => Arc::new(ForkExecutor::new()),
        };
        // Machine-readable runs report progress as log events only.
        let sink: Arc<dyn ProgressSink> = match log_format {
            LogFormat::Text => Arc::new(TerminalSink),
            LogFormat::Json => Arc::new(TracingSink),
        };
        Ok(Self {
            cloud,
            executor,
            sink,
            config,
        })
    }

    pub fn shell(&self) -> RemoteShell {
        RemoteShell::new(self.config.ssh.clone(), self.executor.clone())
    }

    pub fn selector(&self) -> TargetSelector {
        let budget = self.config.rotation.retry.budget();
        let cloud = RetryingControlPlane::new(self.cloud.clone(), budget);
        TargetSelector::new(Arc::new(cloud), &self.config.ssh)
    }

    pub fn validator(&self) -> ConnectivityValidator {
        ConnectivityValidator::new(self.shell(), self.config.connectivity.clone())
    }
}
