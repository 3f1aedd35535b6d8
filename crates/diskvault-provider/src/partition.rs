//! Contract for transactional GPT partition-table edits.
//!
//! Edits are staged per device and only touch the disk at `commit`; `discard`
//! drops staged work so a failed layout never leaves a half-configured disk.

use std::error::Error;

/// One partition to be added to a staged table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    /// GPT partition label.
    pub label: String,
    /// GPT partition type identifier.
    pub type_guid: String,
    /// Size in MiB; `None` takes the rest of the disk.
    pub size_mib: Option<u64>,
}

/// Abstraction over the host's partition-table tooling.
pub trait PartitionTable {
    type Error: Error + Send + Sync + 'static;

    /// Stage a fresh GPT table for `device`, replacing any staged edits.
    fn create_table(&self, device: &str) -> Result<(), Self::Error>;

    /// Stage an additional partition at `index` (1-based) on `device`.
    fn add_partition(
        &self,
        device: &str,
        index: u32,
        spec: &PartitionSpec,
    ) -> Result<(), Self::Error>;

    /// Write all staged edits for `device` to disk.
    fn commit(&self, device: &str) -> Result<(), Self::Error>;

    /// Drop staged edits for `device` without touching the disk.
    fn discard(&self, device: &str) -> Result<(), Self::Error>;
}
