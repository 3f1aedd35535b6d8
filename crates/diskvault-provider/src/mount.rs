//! Contracts for small-volume filesystem handling and loop-device backing.

use std::error::Error;
use std::path::Path;

/// Abstraction over filesystem creation, mount, and unmount for the keystore
/// volume.
pub trait VolumeMount {
    type Error: Error + Send + Sync + 'static;

    /// Create an empty filesystem on `device`.
    fn make_filesystem(&self, device: &Path) -> Result<(), Self::Error>;

    /// Mount `device` at `mountpoint`.
    fn mount(&self, device: &Path, mountpoint: &Path, read_only: bool)
        -> Result<(), Self::Error>;

    /// Unmount whatever is mounted at `mountpoint`.
    fn unmount(&self, mountpoint: &Path) -> Result<(), Self::Error>;

    /// Whether `mountpoint` currently has a filesystem mounted.
    fn is_mounted(&self, mountpoint: &Path) -> Result<bool, Self::Error>;
}

/// Abstraction over loop/memory devices that expose a file as a block device.
pub trait LoopDevice {
    type Error: Error + Send + Sync + 'static;

    /// Attach `file` to a free loop device and return its node path.
    fn attach_loop(&self, file: &Path, read_only: bool) -> Result<String, Self::Error>;

    /// Release the loop device at `node`.
    fn detach_loop(&self, node: &str) -> Result<(), Self::Error>;

    /// Find the loop device currently backing `file`, if any.
    fn find_loop(&self, file: &Path) -> Result<Option<String>, Self::Error>;
}
