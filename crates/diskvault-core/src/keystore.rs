//! Keystore container lifecycle: create, open, close.
//!
//! The keystore is a fixed-size encrypted container file holding a small
//! filesystem with the per-disk keyfiles. At most one instance may be open
//! process-wide; openness is detected by querying the provider's unlock
//! state rather than an in-process lock, so concurrent invocations from
//! other processes are caught too.

use crate::backup::ciphertext_digest;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::provider::{
    CryptoPolicy, CryptoProvider, FileAttributes, Host, LoopDevice, ProviderState, VolumeMount,
};
use crate::session::Session;
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Fixed wrapper name for the unlocked keystore container.
pub const KEYSTORE_MAPPER: &str = "diskvault-ks";

/// Open mode for the keystore volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreMode {
    ReadOnly,
    ReadWrite,
}

/// Handle to an open keystore.
#[derive(Debug, Clone)]
pub struct KeystoreHandle {
    /// Mountpoint of the keystore's internal filesystem.
    pub mountpoint: PathBuf,
    pub mode: KeystoreMode,
    /// SHA-256 of the container ciphertext, captured before unlocking.
    /// Compared against member-disk backups to decide refreshes.
    pub digest: String,
}

/// Owns the keystore container lifecycle against a host provider.
#[derive(Debug, Clone)]
pub struct KeystoreManager {
    config: VaultConfig,
}

impl KeystoreManager {
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn container_path(&self) -> &Path {
        &self.config.keystore.path
    }

    pub fn mountpoint(&self) -> &Path {
        &self.config.keystore.mountpoint
    }

    /// Create the keystore container: allocate, encrypt, put an empty
    /// filesystem inside, and leave it closed and immutable.
    ///
    /// Creation is all-or-nothing: any failure after partial allocation tears
    /// down whatever was opened and removes the container file.
    pub fn create<H: Host>(&self, host: &H) -> VaultResult<()> {
        let container = self.container_path();
        if container.exists() {
            return Err(VaultError::AlreadyExists(container.to_path_buf()));
        }
        if let Some(parent) = container.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(container)?;
        file.set_len(self.config.keystore_bytes())?;
        file.sync_all()?;

        let keyfile = self.config.keystore.external_keyfile.clone();
        let policy = CryptoPolicy {
            kdf_iterations: self.config.keystore.kdf_iterations,
        };

        let built = self.populate_new_container(host, keyfile.as_deref(), &policy);
        if let Err(err) = built {
            self.teardown_partial_create(host);
            let _ = fs::remove_file(container);
            return Err(err);
        }

        host.set_immutable(container, true)?;
        Ok(())
    }

    fn populate_new_container<H: Host>(
        &self,
        host: &H,
        keyfile: Option<&Path>,
        policy: &CryptoPolicy,
    ) -> VaultResult<()> {
        let container = self.container_path();
        let node = host.attach_loop(container, false)?;
        host.init(&node, keyfile, policy)?;
        host.attach(&node, KEYSTORE_MAPPER, keyfile)?;
        host.make_filesystem(&host.device_node(KEYSTORE_MAPPER))?;
        host.detach(KEYSTORE_MAPPER)?;
        host.detach_loop(&node)?;
        Ok(())
    }

    fn teardown_partial_create<H: Host>(&self, host: &H) {
        if matches!(host.state(KEYSTORE_MAPPER), Ok(ProviderState::Attached)) {
            let _ = host.detach(KEYSTORE_MAPPER);
        }
        if let Ok(Some(node)) = host.find_loop(self.container_path()) {
            let _ = host.detach_loop(&node);
        }
    }

    /// Unlock and mount the keystore.
    ///
    /// Read-write mode clears the container's immutable attribute only for
    /// the unlock window and restores it as soon as the wrapper is attached.
    /// Any failure mid-open runs the full `close` teardown before returning.
    pub fn open<H: Host>(
        &self,
        host: &H,
        mode: KeystoreMode,
        session: &Session,
    ) -> VaultResult<KeystoreHandle> {
        let container = self.container_path();
        if !container.exists() {
            return Err(VaultError::NotFound(container.to_path_buf()));
        }
        match host.state(KEYSTORE_MAPPER)? {
            ProviderState::Attached => {
                return Err(VaultError::AlreadyOpen(KEYSTORE_MAPPER.to_string()))
            }
            ProviderState::Detached => {}
            ProviderState::Unknown(reason) => {
                return Err(VaultError::Operation(format!(
                    "keystore unlock state could not be determined: {reason}"
                )))
            }
        }

        let digest = ciphertext_digest(container)?;

        let opened = self.unlock_and_mount(host, mode);
        match opened {
            Ok(()) => Ok(KeystoreHandle {
                mountpoint: self.mountpoint().to_path_buf(),
                mode,
                digest,
            }),
            Err(err) => {
                let _ = self.close(host, session);
                Err(err)
            }
        }
    }

    fn unlock_and_mount<H: Host>(&self, host: &H, mode: KeystoreMode) -> VaultResult<()> {
        let container = self.container_path();
        let read_only = mode == KeystoreMode::ReadOnly;
        let keyfile = self.config.keystore.external_keyfile.clone();

        if !read_only {
            host.set_immutable(container, false)?;
        }
        let node = host.attach_loop(container, read_only)?;
        host.attach(&node, KEYSTORE_MAPPER, keyfile.as_deref())?;
        if !read_only {
            // The unlock window is over; pin the container again.
            host.set_immutable(container, true)?;
        }

        let mountpoint = self.mountpoint();
        fs::create_dir_all(mountpoint)?;
        host.mount(&host.device_node(KEYSTORE_MAPPER), mountpoint, read_only)?;
        Ok(())
    }

    /// Idempotent, best-effort teardown in strict order: unmount, detach the
    /// wrapper, release the loop device, remove the mount directory, restore
    /// container immutability, detach leftover member wrappers.
    ///
    /// Every step is attempted even when an earlier one fails; the first
    /// failure becomes the reported status. Steps are derived from current
    /// system state, so a fresh process (`closeks`) can tear down a keystore
    /// another invocation left open.
    pub fn close<H: Host>(&self, host: &H, session: &Session) -> VaultResult<()> {
        let container = self.container_path();
        let mountpoint = self.mountpoint();
        let mut first_err: Option<VaultError> = None;
        let mut record = |result: VaultResult<()>| {
            if let Err(err) = result {
                debug!("close step failed: {err}");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        };

        match host.is_mounted(mountpoint) {
            Ok(true) => record(host.unmount(mountpoint)),
            Ok(false) => {}
            Err(err) => record(Err(err)),
        }

        match host.state(KEYSTORE_MAPPER) {
            Ok(ProviderState::Attached) => record(host.detach(KEYSTORE_MAPPER)),
            Ok(_) => {}
            Err(err) => record(Err(err)),
        }

        match host.find_loop(container) {
            Ok(Some(node)) => record(host.detach_loop(&node)),
            Ok(None) => {}
            Err(err) => record(Err(err)),
        }

        if mountpoint.exists() {
            record(fs::remove_dir(mountpoint).map_err(VaultError::Io));
        }

        if container.exists() {
            record(host.set_immutable(container, true));
        }

        for member in session.take_members() {
            if matches!(host.state(&member), Ok(ProviderState::Attached)) {
                record(host.detach(&member));
            }
        }

        match host.state(KEYSTORE_MAPPER) {
            Ok(ProviderState::Detached) => {}
            Ok(state) => warn!(
                "keystore wrapper {KEYSTORE_MAPPER} still reports {state:?} after close; \
                 the container may be in an unsafe state"
            ),
            Err(err) => warn!(
                "could not confirm keystore {KEYSTORE_MAPPER} is closed: {err}; \
                 the container may be in an unsafe state"
            ),
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Install a process-wide signal guard that closes the keystore.
///
/// Registered before the first irreversible open step so an interrupt,
/// hangup, or termination signal during or after unlocking still triggers
/// the full teardown. Best-effort: a second registration in the same process
/// is ignored.
pub fn install_signal_guard<H>(manager: &KeystoreManager, host: &H, session: &Session)
where
    H: Host + Clone + Send + Sync + 'static,
{
    let manager = manager.clone();
    let host = host.clone();
    let session = session.clone();
    let result = ctrlc::set_handler(move || {
        warn!("interrupted; closing keystore");
        let _ = manager.close(&host, &session);
        std::process::exit(1);
    });
    if let Err(err) = result {
        debug!("signal guard already installed: {err}");
    }
}
