//! Two-partition layout planning for member disks.
//!
//! Every member disk carries a keystore-backup partition followed by one
//! encrypted data partition. Sizing is deterministic across heterogeneous
//! drives: the data partition is rounded down to a fixed alignment unit after
//! reserving the backup partition and GPT metadata.

use crate::config::DiskCfg;
use crate::error::{VaultError, VaultResult};
use crate::provider::{DeviceCatalog, PartitionSpec, PartitionTable};

/// Alignment unit for derived data-partition sizes, in MiB.
pub const ALIGNMENT_MIB: u64 = 4;

/// Reserve for primary and backup GPT structures, in MiB.
pub const GPT_OVERHEAD_MIB: u64 = 2;

const MIB: u64 = 1024 * 1024;

/// Computed sizes for one member disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub backup_mib: u64,
    pub data_mib: u64,
}

/// GPT label of the keystore-backup partition for `id`.
pub fn backup_label(id: &str) -> String {
    format!("{id}.keystore")
}

/// Compute the layout for a device of `device_size_bytes`.
///
/// With no fixed size, the data partition takes the largest aligned size that
/// fits; a fixed size is honoured as-is but still validated against capacity.
pub fn plan(
    device_size_bytes: u64,
    backup_mib: u64,
    fixed_data_mib: Option<u64>,
) -> VaultResult<PartitionPlan> {
    let capacity_mib = device_size_bytes / MIB;
    let reserved = backup_mib + GPT_OVERHEAD_MIB;
    if capacity_mib <= reserved {
        return Err(VaultError::Validation(format!(
            "device of {capacity_mib} MiB cannot hold a {backup_mib} MiB keystore backup"
        )));
    }
    let usable = capacity_mib - reserved;

    let data_mib = match fixed_data_mib {
        Some(fixed) => {
            if fixed == 0 || fixed > usable {
                return Err(VaultError::Validation(format!(
                    "fixed data partition of {fixed} MiB does not fit ({usable} MiB usable)"
                )));
            }
            fixed
        }
        None => {
            let aligned = usable / ALIGNMENT_MIB * ALIGNMENT_MIB;
            if aligned == 0 {
                return Err(VaultError::Validation(format!(
                    "device leaves no aligned space for data ({usable} MiB usable)"
                )));
            }
            aligned
        }
    };

    Ok(PartitionPlan {
        backup_mib,
        data_mib,
    })
}

/// Apply `plan` to the device at `node`, labelling partitions by `serial`.
///
/// Staged edits are discarded on any failure before commit, leaving the disk
/// unpartitioned rather than half-enrolled.
pub fn apply_layout<H>(
    host: &H,
    node: &str,
    serial: &str,
    plan: &PartitionPlan,
    disk: &DiskCfg,
) -> VaultResult<()>
where
    H: PartitionTable<Error = VaultError> + DeviceCatalog<Error = VaultError>,
{
    let backup = PartitionSpec {
        label: backup_label(serial),
        type_guid: disk.backup_type_guid.clone(),
        size_mib: Some(plan.backup_mib),
    };
    let data = PartitionSpec {
        label: serial.to_string(),
        type_guid: disk.data_type_guid.clone(),
        size_mib: Some(plan.data_mib),
    };

    let staged = host
        .create_table(node)
        .and_then(|()| host.add_partition(node, 1, &backup))
        .and_then(|()| host.add_partition(node, 2, &data))
        .and_then(|()| host.commit(node));
    if let Err(err) = staged {
        let _ = host.discard(node);
        return Err(err);
    }

    for label in [backup.label.as_str(), data.label.as_str()] {
        if host.partition_node(label)?.is_none() {
            return Err(VaultError::Operation(format!(
                "partition {label} not visible after committing table on {node}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * MIB;

    #[test]
    fn derived_size_is_aligned_and_capacity_safe() {
        let plan = plan(100 * GIB, 64, None).unwrap();
        assert_eq!(plan.backup_mib, 64);
        assert_eq!(plan.data_mib % ALIGNMENT_MIB, 0);
        assert!(plan.data_mib + plan.backup_mib + GPT_OVERHEAD_MIB <= 100 * 1024);
    }

    #[test]
    fn identical_devices_get_identical_plans() {
        let a = plan(4 * GIB + 123, 64, None).unwrap();
        let b = plan(4 * GIB + 123, 64, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_size_is_honoured() {
        let plan = plan(100 * GIB, 64, Some(1000)).unwrap();
        assert_eq!(plan.data_mib, 1000);
    }

    #[test]
    fn oversized_fixed_request_is_rejected() {
        let err = plan(GIB, 64, Some(10_000)).unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[test]
    fn tiny_device_is_rejected() {
        let err = plan(32 * MIB, 64, None).unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }
}
