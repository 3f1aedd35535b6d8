//! Capability contracts between diskvault orchestration and the host system.
//!
//! Concrete implementations live in `diskvault-host`, which shells out to the
//! platform's block-device tooling. Keeping the traits here lets the core
//! crate's workflows run against test doubles without real disks.

pub mod crypto;
pub mod device;
pub mod fileattr;
pub mod mount;
pub mod partition;

pub use crypto::{CryptoPolicy, CryptoProvider, ProviderState};
pub use device::{DeviceCatalog, DiskIdentity};
pub use fileattr::FileAttributes;
pub use mount::{LoopDevice, VolumeMount};
pub use partition::{PartitionSpec, PartitionTable};
