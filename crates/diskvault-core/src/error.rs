//! Error types shared across diskvault crates.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type VaultResult<T> = Result<T, VaultError>;

/// Failure kinds surfaced by diskvault operations.
///
/// Validation-class variants are raised before any side effect; `Operation`
/// wraps failures reported by the underlying host primitives;
/// `PartialRollback` is the most severe kind and always requires manual
/// intervention.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("keystore container already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("keystore container not found at {0}")]
    NotFound(PathBuf),

    #[error("keystore is already open ({0})")]
    AlreadyOpen(String),

    #[error("device {0} already carries a partition table")]
    AlreadyPartitioned(String),

    #[error("disk {0} is already enrolled")]
    AlreadyEnrolled(String),

    #[error("disk {0} is not enrolled")]
    NotEnrolled(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("attach failed ({cause}) and rollback left disks attached: {}", rollback_failures.join("; "))]
    PartialRollback {
        cause: String,
        rollback_failures: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_rollback_lists_every_failure() {
        let err = VaultError::PartialRollback {
            cause: "attach d2: wrong key".into(),
            rollback_failures: vec!["d0: busy".into(), "d1: busy".into()],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("attach d2: wrong key"));
        assert!(rendered.contains("d0: busy; d1: busy"));
    }
}
