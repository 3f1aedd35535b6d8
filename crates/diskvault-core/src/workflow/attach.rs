//! Attach/detach orchestration across the member-disk set.
//!
//! Attach is transactional: either every requested disk ends up attached or
//! none do. Detach is deliberately best-effort per disk, since leaving some
//! disks attached after a partial failure is safer than re-attaching ones
//! already detached.

use crate::backup::refresh_backup;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::keyfile::KeyfileStore;
use crate::keystore::{install_signal_guard, KeystoreHandle, KeystoreManager, KeystoreMode};
use crate::plan::backup_label;
use crate::provider::{CryptoProvider, DeviceCatalog, Host, ProviderState};
use crate::session::Session;
use crate::workflow::{apply_each, event, FailurePolicy, WorkflowLevel, WorkflowReport};
use log::debug;
use std::path::PathBuf;

/// One fully validated attach target.
struct Candidate {
    id: String,
    keyfile: PathBuf,
    data_node: PathBuf,
    backup_node: PathBuf,
}

/// Per-disk view reported by `status`.
#[derive(Debug, Clone)]
pub struct DiskStatus {
    pub id: String,
    pub state: ProviderState,
    pub auto_attach: bool,
    pub backup_fresh: Option<bool>,
}

/// Attach member disks, all-or-nothing.
///
/// With no explicit ids, every enrolled disk whose auto-attach marker is not
/// set is a target; explicit ids override the marker. The keystore is opened
/// once for the whole batch and closed once at the end.
pub fn attach<H>(
    config: &VaultConfig,
    host: &H,
    session: &Session,
    explicit: &[String],
) -> VaultResult<WorkflowReport>
where
    H: Host + Clone + Send + Sync + 'static,
{
    let manager = KeystoreManager::new(config);
    install_signal_guard(&manager, host, session);
    let handle = manager.open(host, KeystoreMode::ReadOnly, session)?;

    let mut events = Vec::new();
    let result = attach_batch(&manager, host, session, &handle, explicit, &mut events);
    let closed = manager.close(host, session);

    result?;
    closed?;
    Ok(WorkflowReport {
        title: "Attached member disks".to_string(),
        events,
    })
}

fn attach_batch<H: Host>(
    manager: &KeystoreManager,
    host: &H,
    session: &Session,
    handle: &KeystoreHandle,
    explicit: &[String],
    events: &mut Vec<crate::workflow::WorkflowEvent>,
) -> VaultResult<()> {
    let store = KeyfileStore::new(&handle.mountpoint, host);
    let explicit_given = !explicit.is_empty();
    let ids = if explicit_given {
        resolve_ids(host, explicit)?
    } else {
        store.list_enrolled()?
    };

    // Pre-flight: every target must be fully formed before any side effect.
    let mut candidates = Vec::with_capacity(ids.len());
    for id in &ids {
        let keyfile = store.keyfile_path(id)?;
        let backup_node = host.partition_node(&backup_label(id))?.ok_or_else(|| {
            VaultError::Validation(format!("backup partition for {id} is not visible"))
        })?;
        let data_node = host.partition_node(id)?.ok_or_else(|| {
            VaultError::Validation(format!("data partition for {id} is not visible"))
        })?;
        candidates.push(Candidate {
            id: id.clone(),
            keyfile,
            data_node,
            backup_node,
        });
    }

    let mut targets = Vec::new();
    for candidate in candidates {
        if matches!(host.state(&candidate.id)?, ProviderState::Attached) {
            events.push(event(
                WorkflowLevel::Info,
                format!("{} already attached", candidate.id),
            ));
            continue;
        }
        if !explicit_given && !store.auto_attach_enabled(&candidate.id) {
            events.push(event(
                WorkflowLevel::Info,
                format!("{} skipped (auto-attach disabled)", candidate.id),
            ));
            continue;
        }
        targets.push(candidate);
    }

    let outcome = apply_each(&targets, FailurePolicy::AllOrNothing, |candidate| {
        host.attach(
            &candidate.data_node.to_string_lossy(),
            &candidate.id,
            Some(&candidate.keyfile),
        )?;
        session.record_member(&candidate.id);

        let refreshed = refresh_backup(
            manager.container_path(),
            &candidate.backup_node,
            &handle.digest,
        )?;
        if refreshed {
            events.push(event(
                WorkflowLevel::Success,
                format!("{} attached; keystore backup refreshed", candidate.id),
            ));
        } else {
            debug!("{} backup already matches the keystore", candidate.id);
            events.push(event(
                WorkflowLevel::Success,
                format!("{} attached", candidate.id),
            ));
        }
        Ok(())
    });

    match outcome {
        Ok(()) => {
            session.commit_members();
            Ok(())
        }
        Err(cause) => Err(rollback_attached(host, session, cause)),
    }
}

/// Detach every wrapper recorded in the session, most recent first.
///
/// Rollback failures are aggregated; they never mask the original cause.
fn rollback_attached<H: Host>(host: &H, session: &Session, cause: VaultError) -> VaultError {
    let mut failures = Vec::new();
    for name in session.take_members() {
        if let Err(err) = host.detach(&name) {
            failures.push(format!("{name}: {err}"));
        }
    }
    if failures.is_empty() {
        cause
    } else {
        VaultError::PartialRollback {
            cause: cause.to_string(),
            rollback_failures: failures,
        }
    }
}

/// Detach member disks, best-effort.
///
/// With no explicit ids, every enrolled disk that is currently attached is a
/// target; enumerating those requires the keystore, so only that case opens
/// it (read-only).
pub fn detach<H>(
    config: &VaultConfig,
    host: &H,
    session: &Session,
    explicit: &[String],
) -> VaultResult<WorkflowReport>
where
    H: Host + Clone + Send + Sync + 'static,
{
    let ids = if explicit.is_empty() {
        let manager = KeystoreManager::new(config);
        install_signal_guard(&manager, host, session);
        let handle = manager.open(host, KeystoreMode::ReadOnly, session)?;
        let listed = KeyfileStore::new(&handle.mountpoint, host).list_enrolled();
        let closed = manager.close(host, session);
        let listed = listed?;
        closed?;
        listed
    } else {
        resolve_ids(host, explicit)?
    };

    let mut events = Vec::new();
    let outcome = apply_each(&ids, FailurePolicy::BestEffort, |id| {
        match host.state(id)? {
            ProviderState::Attached => {
                host.detach(id)?;
                events.push(event(WorkflowLevel::Success, format!("{id} detached")));
                Ok(())
            }
            ProviderState::Detached => {
                events.push(event(WorkflowLevel::Info, format!("{id} not attached")));
                Ok(())
            }
            ProviderState::Unknown(reason) => Err(VaultError::Operation(format!(
                "{id} state unknown: {reason}"
            ))),
        }
    });
    outcome?;

    Ok(WorkflowReport {
        title: "Detached member disks".to_string(),
        events,
    })
}

/// Toggle auto-attach markers, reporting unknown ids without aborting.
pub fn set_auto_attach<H>(
    config: &VaultConfig,
    host: &H,
    session: &Session,
    ids: &[String],
    enabled: bool,
) -> VaultResult<WorkflowReport>
where
    H: Host + Clone + Send + Sync + 'static,
{
    let manager = KeystoreManager::new(config);
    install_signal_guard(&manager, host, session);
    let handle = manager.open(host, KeystoreMode::ReadWrite, session)?;

    let mut events = Vec::new();
    let store = KeyfileStore::new(&handle.mountpoint, host);
    let mut result = Ok(());
    for reference in ids {
        // A reference may already be a serial; otherwise resolve the device.
        let id = match host.resolve(reference) {
            Ok(identity) => identity.serial,
            Err(_) => reference.clone(),
        };
        if store.keyfile_path(&id).is_err() {
            events.push(event(
                WorkflowLevel::Warn,
                format!("{reference} is not an enrolled disk"),
            ));
            continue;
        }
        match store.set_auto_attach(&id, enabled) {
            Ok(()) => events.push(event(
                WorkflowLevel::Success,
                format!(
                    "{id} auto-attach {}",
                    if enabled { "enabled" } else { "disabled" }
                ),
            )),
            Err(err) => {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
    }

    let closed = manager.close(host, session);
    result?;
    closed?;
    Ok(WorkflowReport {
        title: "Updated auto-attach markers".to_string(),
        events,
    })
}

/// Snapshot attach state, auto-attach flags, and backup freshness.
pub fn status<H>(
    config: &VaultConfig,
    host: &H,
    session: &Session,
) -> VaultResult<Vec<DiskStatus>>
where
    H: Host + Clone + Send + Sync + 'static,
{
    let manager = KeystoreManager::new(config);
    install_signal_guard(&manager, host, session);
    let handle = manager.open(host, KeystoreMode::ReadOnly, session)?;

    let collected = collect_status(&manager, host, &handle);
    let closed = manager.close(host, session);
    let statuses = collected?;
    closed?;
    Ok(statuses)
}

fn collect_status<H: Host>(
    manager: &KeystoreManager,
    host: &H,
    handle: &KeystoreHandle,
) -> VaultResult<Vec<DiskStatus>> {
    let store = KeyfileStore::new(&handle.mountpoint, host);
    let container_len = std::fs::metadata(manager.container_path())?.len();

    let mut statuses = Vec::new();
    for id in store.list_enrolled()? {
        let backup_fresh = match host.partition_node(&backup_label(&id))? {
            Some(node) => Some(
                crate::backup::backup_digest(&node, container_len)? == handle.digest,
            ),
            None => None,
        };
        statuses.push(DiskStatus {
            state: host.state(&id)?,
            auto_attach: store.auto_attach_enabled(&id),
            backup_fresh,
            id,
        });
    }
    Ok(statuses)
}

/// Resolve user-supplied references to serial ids, preserving order.
fn resolve_ids<H: Host>(host: &H, explicit: &[String]) -> VaultResult<Vec<String>> {
    let mut ids = Vec::with_capacity(explicit.len());
    for reference in explicit {
        let serial = host.resolve(reference)?.serial;
        if !ids.contains(&serial) {
            ids.push(serial);
        }
    }
    Ok(ids)
}
