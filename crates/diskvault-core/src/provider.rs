//! Provider contracts used by diskvault workflows.
//!
//! The capability traits are sourced from `diskvault-provider`; concrete
//! implementations live in `diskvault-host`. Workflows only ever see the
//! combined `Host` bound so mocks can stand in for the whole machine.

use crate::error::VaultError;

pub use diskvault_provider::crypto::{CryptoPolicy, CryptoProvider, ProviderState};
pub use diskvault_provider::device::{DeviceCatalog, DiskIdentity};
pub use diskvault_provider::fileattr::FileAttributes;
pub use diskvault_provider::mount::{LoopDevice, VolumeMount};
pub use diskvault_provider::partition::{PartitionSpec, PartitionTable};

/// Everything the orchestration layer needs from the host, with one shared
/// error type.
pub trait Host:
    CryptoProvider<Error = VaultError>
    + PartitionTable<Error = VaultError>
    + VolumeMount<Error = VaultError>
    + LoopDevice<Error = VaultError>
    + DeviceCatalog<Error = VaultError>
    + FileAttributes<Error = VaultError>
{
}

impl<T> Host for T where
    T: CryptoProvider<Error = VaultError>
        + PartitionTable<Error = VaultError>
        + VolumeMount<Error = VaultError>
        + LoopDevice<Error = VaultError>
        + DeviceCatalog<Error = VaultError>
        + FileAttributes<Error = VaultError>
{
}
