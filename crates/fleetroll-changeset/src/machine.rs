//! Change-set state machine.
//!
//! ```text
//! submit → PENDING ──poll──▶ CREATE_COMPLETE ─┬─ execute → applied
//!                    └─────▶ FAILED ──────────┴─ discard → deleted
//! ```
//!
//! `execute` and `discard` wait for a terminal status first if none has
//! been observed yet. Throttled calls are retried under
//! `change_set.retry`.

use std::sync::Arc;
use std::time::Duration;

use fleetroll_core::{
    ChangeSetApi, ChangeSetConfig, ChangeSetDescription, ChangeSetRequest, ChangeSetStatus,
    CloudError, retry_transient,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::diff::ChangeSetDiff;
use crate::error::{ChangeSetError, ChangeSetResult};
use crate::prompt::Prompter;

pub struct ChangeSet {
    api: Arc<dyn ChangeSetApi>,
    name: String,
    stack: String,
    config: ChangeSetConfig,
    interactive: bool,
    last: Option<ChangeSetDescription>,
}

impl ChangeSet {
    pub fn new(
        api: Arc<dyn ChangeSetApi>,
        name: &str,
        stack: &str,
        config: ChangeSetConfig,
        interactive: bool,
    ) -> Self {
        Self {
            api,
            name: name.to_string(),
            stack: stack.to_string(),
            config,
            interactive,
            last: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    /// The most recent description, if the change set has been polled.
    pub fn description(&self) -> Option<&ChangeSetDescription> {
        self.last.as_ref()
    }

    /// Reason reported for a failed change set.
    pub fn status_reason(&self) -> Option<&str> {
        self.last.as_ref().and_then(|d| d.status_reason.as_deref())
    }

    /// Ask the control plane to create the change set. Does not wait.
    pub async fn submit(&mut self, template_body: &str) -> ChangeSetResult<()> {
        let request = ChangeSetRequest {
            name: self.name.clone(),
            stack_name: self.stack.clone(),
            template_body: template_body.to_string(),
        };
        retry_transient(self.config.retry.budget(), "create_change_set", || {
            self.api.create_change_set(&request)
        })
        .await?;
        self.last = None;
        info!(change_set = %self.name, stack = %self.stack, "change set submitted");
        Ok(())
    }

    /// Wait until the change set is `CREATE_COMPLETE` or `FAILED`.
    ///
    /// `timeout` defaults to `change_set.wait_timeout`. One status check is
    /// made up front; if it is already terminal no polling happens.
    pub async fn await_terminal(
        &mut self,
        timeout: Option<Duration>,
    ) -> ChangeSetResult<ChangeSetStatus> {
        if let Some(status) = self.observed_terminal() {
            return Ok(status);
        }

        let timeout = timeout.unwrap_or(self.config.wait_timeout);
        let started = Instant::now();
        let mut status = self.refresh().await?;

        while !status.is_terminal() {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(change_set = %self.name, ?elapsed, "change set still pending");
                return Err(ChangeSetError::Timeout {
                    name: self.name.clone(),
                    timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(timeout - elapsed)).await;
            status = self.refresh().await?;
        }

        debug!(change_set = %self.name, %status, "change set settled");
        Ok(status)
    }

    /// The proposed resource changes.
    pub async fn diff(&mut self) -> ChangeSetResult<ChangeSetDiff> {
        self.require_created().await?;
        let changes = self
            .last
            .as_ref()
            .map(|d| d.changes.clone())
            .unwrap_or_default();
        Ok(ChangeSetDiff::new(changes))
    }

    /// Ask whether to apply. Loops until the answer is `yes` or `no`.
    pub fn confirm(&self, prompter: &mut dyn Prompter) -> ChangeSetResult<bool> {
        if !self.interactive {
            return Err(ChangeSetError::NonInteractive(self.name.clone()));
        }
        loop {
            let answer = prompter.ask("Apply changes? ")?;
            match answer.trim().to_lowercase().as_str() {
                "yes" => return Ok(true),
                "no" => return Ok(false),
                _ => prompter.say("Please enter 'yes' or 'no'!")?,
            }
        }
    }

    /// Apply the change set to its stack. Irreversible.
    pub async fn execute(&mut self) -> ChangeSetResult<()> {
        self.require_created().await?;
        retry_transient(self.config.retry.budget(), "execute_change_set", || {
            self.api.execute_change_set(&self.name, &self.stack)
        })
        .await?;
        info!(change_set = %self.name, stack = %self.stack, "change set executed");
        Ok(())
    }

    /// Delete the change set without applying it.
    ///
    /// A delete rejected because of the change set's current status is
    /// retried up to `change_set.delete_retry_attempts` times. A change set
    /// that is already gone counts as deleted.
    pub async fn discard(&mut self) -> ChangeSetResult<()> {
        self.await_terminal(None).await?;

        let attempts = self.config.delete_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let deleted = retry_transient(self.config.retry.budget(), "delete_change_set", || {
                self.api.delete_change_set(&self.name, &self.stack)
            })
            .await;
            match deleted {
                Ok(()) => {
                    info!(change_set = %self.name, stack = %self.stack, "change set deleted");
                    return Ok(());
                }
                Err(CloudError::NotFound(_)) => {
                    debug!(change_set = %self.name, "change set already gone");
                    return Ok(());
                }
                Err(CloudError::InvalidChangeSetStatus(reason)) => {
                    debug!(change_set = %self.name, attempt, %reason, "delete not allowed yet");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.delete_retry_delay).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ChangeSetError::DeleteRetriesExhausted {
            name: self.name.clone(),
            attempts,
        })
    }

    fn observed_terminal(&self) -> Option<ChangeSetStatus> {
        self.last
            .as_ref()
            .map(|d| d.status)
            .filter(ChangeSetStatus::is_terminal)
    }

    async fn refresh(&mut self) -> ChangeSetResult<ChangeSetStatus> {
        let description = retry_transient(self.config.retry.budget(), "describe_change_set", || {
            self.api.describe_change_set(&self.name, &self.stack)
        })
        .await?;
        let status = description.status;
        self.last = Some(description);
        Ok(status)
    }

    async fn require_created(&mut self) -> ChangeSetResult<()> {
        match self.await_terminal(None).await? {
            ChangeSetStatus::CreateComplete => Ok(()),
            status => Err(ChangeSetError::NotCreated {
                name: self.name.clone(),
                status,
                reason: self.status_reason().map(str::to_string),
            }),
        }
    }
}
