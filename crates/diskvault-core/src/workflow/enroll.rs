//! Member-disk enrollment: keyfile, partitions, encryption, header backup.

use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::keyfile::KeyfileStore;
use crate::keystore::{install_signal_guard, KeystoreHandle, KeystoreManager, KeystoreMode};
use crate::plan::{self, backup_label};
use crate::provider::{CryptoPolicy, CryptoProvider, DeviceCatalog, Host};
use crate::rng;
use crate::session::Session;
use crate::workflow::{event, WorkflowLevel, WorkflowReport};

/// Enroll one or more raw devices as member disks.
///
/// The keystore is opened read-write once for the batch. Enrollment stops at
/// the first failing device; a failure after keyfile creation is surfaced
/// directly rather than cleaned up, because destruction of the keyfile's
/// disk usage cannot be verified at that point.
pub fn enroll<H>(
    config: &VaultConfig,
    host: &H,
    session: &Session,
    devices: &[String],
) -> VaultResult<WorkflowReport>
where
    H: Host + Clone + Send + Sync + 'static,
{
    let manager = KeystoreManager::new(config);
    install_signal_guard(&manager, host, session);
    let handle = manager.open(host, KeystoreMode::ReadWrite, session)?;

    let mut events = Vec::new();
    let mut result = Ok(());
    for device in devices {
        if let Err(err) = enroll_one(config, host, &handle, device, &mut events) {
            result = Err(err);
            break;
        }
    }
    let closed = manager.close(host, session);

    result?;
    closed?;
    Ok(WorkflowReport {
        title: "Enrolled member disks".to_string(),
        events,
    })
}

fn enroll_one<H: Host>(
    config: &VaultConfig,
    host: &H,
    handle: &KeystoreHandle,
    device: &str,
    events: &mut Vec<crate::workflow::WorkflowEvent>,
) -> VaultResult<()> {
    let identity = host.resolve(device)?;
    let serial = identity.serial.as_str();
    let node = identity.node.as_str();

    if host.has_partition_table(node)? {
        return Err(VaultError::AlreadyPartitioned(node.to_string()));
    }

    let store = KeyfileStore::new(&handle.mountpoint, host);
    if store.any_entry_exists(serial)
        || host.partition_node(serial)?.is_some()
        || host.partition_node(&backup_label(serial))?.is_some()
    {
        return Err(VaultError::AlreadyEnrolled(serial.to_string()));
    }

    let key = rng::generate_keyfile();
    let keyfile = store.write_keyfile(serial, &key)?;
    events.push(event(
        WorkflowLevel::Info,
        format!("{serial}: keyfile created"),
    ));

    let layout = plan::plan(
        host.size_bytes(node)?,
        config.disk.backup_size_mib,
        config.disk.data_size_mib,
    )?;
    plan::apply_layout(host, node, serial, &layout, &config.disk)?;
    events.push(event(
        WorkflowLevel::Info,
        format!(
            "{serial}: partitioned ({} MiB backup, {} MiB data)",
            layout.backup_mib, layout.data_mib
        ),
    ));

    let data_node = host.partition_node(serial)?.ok_or_else(|| {
        VaultError::Operation(format!("data partition for {serial} vanished after commit"))
    })?;
    host.init(
        &data_node.to_string_lossy(),
        Some(&keyfile),
        &CryptoPolicy::default(),
    )?;

    host.backup_header(
        &data_node.to_string_lossy(),
        &store.header_backup_path(serial),
    )?;
    store.lock_header_backup(serial)?;

    events.push(event(
        WorkflowLevel::Success,
        format!("{serial}: enrolled ({device})"),
    ));
    Ok(())
}
