//! Human-readable change-set diff.

use std::fmt;

use fleetroll_core::{ChangeSource, Replacement, ResourceChange};

/// The resource changes of a created change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetDiff {
    changes: Vec<ResourceChange>,
}

impl ChangeSetDiff {
    pub fn new(changes: Vec<ResourceChange>) -> Self {
        Self { changes }
    }

    pub fn changes(&self) -> &[ResourceChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changes that will or may replace their resource.
    pub fn replacements(&self) -> impl Iterator<Item = &ResourceChange> {
        self.changes
            .iter()
            .filter(|c| c.replacement != Replacement::False)
    }
}

impl fmt::Display for ChangeSetDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changes {
            writeln!(
                f,
                "* {} {} ({})",
                change.action, change.logical_id, change.resource_type
            )?;
            match change.replacement {
                Replacement::True => writeln!(f, " - Will be replaced")?,
                Replacement::Conditional => writeln!(f, " - May be replaced (Conditional)")?,
                Replacement::False => {}
            }
            for detail in &change.details {
                match detail {
                    ChangeSource::ResourceReference { causing_entity } => {
                        writeln!(f, " - Caused by {causing_entity} (ResourceReference)")?
                    }
                    ChangeSource::ParameterReference { causing_entity } => {
                        writeln!(f, " - Caused by {causing_entity} (ParameterReference)")?
                    }
                    ChangeSource::DirectModification { attribute, name } => {
                        writeln!(f, " - Caused by template change ({attribute}: {name})")?
                    }
                    ChangeSource::Automatic => {}
                }
            }
        }
        Ok(())
    }
}
