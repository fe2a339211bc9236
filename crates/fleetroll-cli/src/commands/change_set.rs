use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use fleetroll_changeset::{ChangeSet, ChangeSetOutcome, StdinPrompter, review_and_apply};
use fleetroll_core::ChangeSetConfig;

use super::Context;

pub async fn run(
    ctx: &Context,
    stack: &str,
    name: &str,
    template: &Path,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(template)
        .with_context(|| format!("failed to read template {}", template.display()))?;

    let config = ChangeSetConfig {
        wait_timeout: timeout
            .map(Duration::from_secs)
            .unwrap_or(ctx.config.change_set.wait_timeout),
        ..ctx.config.change_set.clone()
    };
    let mut change_set = ChangeSet::new(
        ctx.cloud.clone(),
        name,
        stack,
        config,
        ctx.config.interactive,
    );
    let mut prompter = StdinPrompter::stdio();

    match review_and_apply(&mut change_set, &body, &mut prompter, ctx.sink.as_ref()).await? {
        ChangeSetOutcome::Rejected(reason) => {
            anyhow::bail!("change set {name} was rejected: {reason}")
        }
        ChangeSetOutcome::Applied | ChangeSetOutcome::Discarded | ChangeSetOutcome::NoChanges => {
            Ok(())
        }
    }
}
