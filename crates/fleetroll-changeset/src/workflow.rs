//! Submit, review and apply a change set in one pass.

use fleetroll_core::{ChangeSetStatus, ProgressSink};
use tracing::info;

use crate::error::ChangeSetResult;
use crate::machine::ChangeSet;
use crate::prompt::Prompter;

/// Status reason the control plane gives for a change set with no changes.
const NO_CHANGES: &str = "didn't contain changes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSetOutcome {
    /// Executed against the stack.
    Applied,
    /// Declined by the operator and deleted.
    Discarded,
    /// Nothing to change; the change set was deleted.
    NoChanges,
    /// The control plane refused to create it; the change set was deleted.
    Rejected(String),
}

/// Submit `template_body`, show the resulting diff and apply it.
///
/// In interactive mode the operator must answer `yes` before anything is
/// executed; otherwise the change set is applied without asking.
pub async fn review_and_apply(
    change_set: &mut ChangeSet,
    template_body: &str,
    prompter: &mut dyn Prompter,
    sink: &dyn ProgressSink,
) -> ChangeSetResult<ChangeSetOutcome> {
    sink.start(&format!(
        "Creating change set {} for stack {}",
        change_set.name(),
        change_set.stack()
    ));
    change_set.submit(template_body).await?;

    if let Err(e) = change_set.await_terminal(None).await {
        sink.failure(&format!("Change set {} did not settle: {e}", change_set.name()));
        return Err(e);
    }

    if change_set.description().map(|d| d.status) == Some(ChangeSetStatus::Failed) {
        let reason = change_set
            .status_reason()
            .unwrap_or("no reason given")
            .to_string();
        change_set.discard().await?;
        if reason.contains(NO_CHANGES) {
            sink.success(&format!("No changes to apply to {}", change_set.stack()));
            return Ok(ChangeSetOutcome::NoChanges);
        }
        sink.failure(&format!("Change set {} failed: {reason}", change_set.name()));
        return Ok(ChangeSetOutcome::Rejected(reason));
    }

    let diff = change_set.diff().await?;
    sink.success(&format!(
        "Change set {} proposes {} resource changes",
        change_set.name(),
        diff.changes().len()
    ));
    for line in diff.to_string().lines() {
        sink.progress(line);
    }

    let apply = if change_set.interactive() {
        change_set.confirm(prompter)?
    } else {
        true
    };

    if apply {
        sink.start(&format!("Applying change set {}", change_set.name()));
        change_set.execute().await?;
        info!(change_set = %change_set.name(), stack = %change_set.stack(), "applied");
        sink.success(&format!("Applied change set to {}", change_set.stack()));
        Ok(ChangeSetOutcome::Applied)
    } else {
        change_set.discard().await?;
        sink.success(&format!("Discarded change set {}", change_set.name()));
        Ok(ChangeSetOutcome::Discarded)
    }
}
