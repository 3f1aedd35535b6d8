//! Workflow orchestration for enrollment, attach/detach, and wiping.

mod attach;
mod enroll;
mod wipe;


use crate::error::VaultResult;

pub use attach::{attach, detach, set_auto_attach, status, DiskStatus};
pub use enroll::enroll;
pub use wipe::wipe;

/// Severity levels used when reporting workflow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// Single line of output produced by a workflow step.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub level: WorkflowLevel,
    pub message: String,
}

/// Aggregated report returned by any workflow entry point.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub title: String,
    pub events: Vec<WorkflowEvent>,
}

/// Convenience constructor that wraps the repeated boilerplate.
pub(crate) fn event(level: WorkflowLevel, message: impl Into<String>) -> WorkflowEvent {
    WorkflowEvent {
        level,
        message: message.into(),
    }
}

/// How a multi-item sequence reacts to a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failure; the caller undoes the successful prefix.
    AllOrNothing,
    /// Attempt every item; return the first failure afterwards.
    BestEffort,
}

/// Apply `op` to each item under the given failure policy.
pub(crate) fn apply_each<T, F>(items: &[T], policy: FailurePolicy, mut op: F) -> VaultResult<()>
where
    F: FnMut(&T) -> VaultResult<()>,
{
    match policy {
        FailurePolicy::AllOrNothing => {
            for item in items {
                op(item)?;
            }
            Ok(())
        }
        FailurePolicy::BestEffort => {
            let mut first_err = None;
            for item in items {
                if let Err(err) = op(item) {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
            match first_err {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}
