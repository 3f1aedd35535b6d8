//! Process-local transaction state shared with the cleanup path.

use std::sync::{Arc, Mutex};

/// Ephemeral record of member wrappers attached during one transaction.
///
/// The orchestrator records each successful attach here; on success it
/// commits (clears) the record, on failure the same record drives rollback.
/// A clone is handed to the signal guard so an interrupt mid-transaction
/// still sees exactly the prefix that succeeded.
#[derive(Debug, Clone, Default)]
pub struct Session {
    attached: Arc<Mutex<Vec<String>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully attached wrapper name.
    pub fn record_member(&self, name: &str) {
        self.attached.lock().unwrap().push(name.to_string());
    }

    /// Mark the transaction committed: attached wrappers stay attached.
    pub fn commit_members(&self) {
        self.attached.lock().unwrap().clear();
    }

    /// Drain the rollback list, most recent first.
    pub fn take_members(&self) -> Vec<String> {
        let mut names = std::mem::take(&mut *self.attached.lock().unwrap());
        names.reverse();
        names
    }
}
