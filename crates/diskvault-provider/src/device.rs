//! Contract for physical device identification and sizing.
//!
//! Serial identifiers are the durable key for all per-disk state; device
//! paths are transient and only used at the point of an operation.

use std::error::Error;
use std::path::PathBuf;

/// Canonical identity of a physical disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskIdentity {
    /// Hardware-derived serial identifier.
    pub serial: String,
    /// Device node the disk is currently reachable at.
    pub node: String,
}

/// Abstraction over host device enumeration.
pub trait DeviceCatalog {
    type Error: Error + Send + Sync + 'static;

    /// Map a user-supplied reference (path, short name, or serial) to a
    /// canonical identity.
    fn resolve(&self, reference: &str) -> Result<DiskIdentity, Self::Error>;

    /// Capacity of the device at `node` in bytes.
    fn size_bytes(&self, node: &str) -> Result<u64, Self::Error>;

    /// Whether the device at `node` already carries a partition table.
    fn has_partition_table(&self, node: &str) -> Result<bool, Self::Error>;

    /// Node for the partition labelled `label`, when visible.
    fn partition_node(&self, label: &str) -> Result<Option<PathBuf>, Self::Error>;
}
