//! fleetroll-changeset: the change-set lifecycle.
//!
//! A change set is submitted, polled until it settles (`CREATE_COMPLETE`
//! or `FAILED`) within a time budget, reviewed as a diff, and then either
//! executed or deleted. Execution is irreversible, so in interactive mode
//! it is gated behind an explicit `yes`.

pub mod diff;
pub mod error;
pub mod machine;
pub mod prompt;
pub mod workflow;

pub use diff::ChangeSetDiff;
pub use error::{ChangeSetError, ChangeSetResult};
pub use machine::ChangeSet;
pub use prompt::{Prompter, ScriptedPrompter, StdinPrompter};
pub use workflow::{ChangeSetOutcome, review_and_apply};
