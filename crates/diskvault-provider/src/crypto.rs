//! Contract for the block-device encryption primitive.
//!
//! The primitive owns ciphering, key slots, and the decrypted device node;
//! diskvault only decides which source gets attached under which name and
//! with which key material.

use std::error::Error;
use std::path::{Path, PathBuf};

/// Normalised unlock state for an encryption wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderState {
    Attached,
    Detached,
    Unknown(String),
}

/// Policy applied when initialising a new encrypted source.
///
/// Authentication is deliberately not part of the policy: the keystore
/// contract is confidentiality-only, and member disks rely on the header
/// backup as their recovery path.
#[derive(Debug, Clone, Default)]
pub struct CryptoPolicy {
    /// Optional KDF iteration count override.
    pub kdf_iterations: Option<u32>,
}

/// Abstraction over the host's disk-encryption commands.
pub trait CryptoProvider {
    type Error: Error + Send + Sync + 'static;

    /// Initialise encryption on `source` under `policy`.
    ///
    /// `keyfile = None` means the primitive prompts for a passphrase on its
    /// own terminal; `Some(path)` uses the file as the sole secret.
    fn init(
        &self,
        source: &str,
        keyfile: Option<&Path>,
        policy: &CryptoPolicy,
    ) -> Result<(), Self::Error>;

    /// Attach (unlock) `source` as the named wrapper.
    fn attach(&self, source: &str, name: &str, keyfile: Option<&Path>)
        -> Result<(), Self::Error>;

    /// Detach (lock) the named wrapper.
    fn detach(&self, name: &str) -> Result<(), Self::Error>;

    /// Report the unlock state for the named wrapper.
    fn state(&self, name: &str) -> Result<ProviderState, Self::Error>;

    /// Write a backup of the on-disk encryption header for `source` to `dest`.
    fn backup_header(&self, source: &str, dest: &Path) -> Result<(), Self::Error>;

    /// Path of the decrypted device node for the named wrapper.
    fn device_node(&self, name: &str) -> PathBuf;
}
