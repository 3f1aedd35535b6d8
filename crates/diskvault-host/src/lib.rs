#![forbid(unsafe_code)]

//! System provider backing the diskvault capability contracts.
//!
//! Integrates with the host via:
//! - `cryptsetup` (format/open/close/status/header backup)
//! - `sgdisk` + `blockdev` (partition tables, capacities)
//! - `losetup`, `mount`/`umount`, `mkfs.ext4` (keystore volume plumbing)
//! - `chattr`/`lsattr` (immutability pinning)
//! - `lsblk` (serial resolution)

mod command;
mod system;

pub use system::SystemHostProvider;
