//! Per-disk keyfile and marker custody inside an open keystore mount.
//!
//! Every file is named by the member disk's serial identifier:
//! `<id>.key` holds the raw keyfile, `<id>.noauto` marks auto-attach as
//! disabled (absence means enabled), and `<id>.header` carries the encryption
//! header backup written at enrollment.

use crate::error::{VaultError, VaultResult};
use crate::provider::FileAttributes;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const KEYFILE_SUFFIX: &str = "key";
const NOAUTO_SUFFIX: &str = "noauto";
const HEADER_SUFFIX: &str = "header";

/// View over the keyfiles of one open keystore mount.
pub struct KeyfileStore<'a, A: FileAttributes<Error = VaultError>> {
    root: PathBuf,
    attrs: &'a A,
}

impl<'a, A: FileAttributes<Error = VaultError>> KeyfileStore<'a, A> {
    pub fn new(root: &Path, attrs: &'a A) -> Self {
        Self {
            root: root.to_path_buf(),
            attrs,
        }
    }

    /// Serial identifiers present as keyfiles, in stable order.
    pub fn list_enrolled(&self) -> VaultResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(&format!(".{KEYFILE_SUFFIX}")) {
                if !id.is_empty() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Path of the keyfile for `id`, failing when the disk is not enrolled.
    pub fn keyfile_path(&self, id: &str) -> VaultResult<PathBuf> {
        let path = self.entry_path(id, KEYFILE_SUFFIX);
        if !path.is_file() {
            return Err(VaultError::NotEnrolled(id.to_string()));
        }
        Ok(path)
    }

    /// Create the keyfile for `id`, permission-locked and immutable.
    ///
    /// Keyfiles are write-once: re-keying a disk means a new enrollment, not
    /// an edit.
    pub fn write_keyfile(&self, id: &str, key: &[u8]) -> VaultResult<PathBuf> {
        let path = self.entry_path(id, KEYFILE_SUFFIX);
        if path.exists() {
            return Err(VaultError::AlreadyEnrolled(id.to_string()));
        }

        let mut temp = NamedTempFile::new_in(&self.root)?;
        temp.as_file_mut().write_all(key)?;
        temp.as_file_mut().flush()?;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o400))?;
        let _ = temp.as_file().sync_all();
        temp.persist(&path).map_err(|err| VaultError::Io(err.error))?;
        let _ = sync_dir(&self.root);

        self.attrs.set_immutable(&path, true)?;
        Ok(path)
    }

    /// Whether `id` participates in argument-less attach runs.
    pub fn auto_attach_enabled(&self, id: &str) -> bool {
        !self.entry_path(id, NOAUTO_SUFFIX).exists()
    }

    /// Toggle the auto-attach marker for `id`.
    pub fn set_auto_attach(&self, id: &str, enabled: bool) -> VaultResult<()> {
        let marker = self.entry_path(id, NOAUTO_SUFFIX);
        if enabled {
            match fs::remove_file(&marker) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        } else {
            fs::write(&marker, b"")?;
            Ok(())
        }
    }

    /// Destination for the encryption-header backup of `id`.
    pub fn header_backup_path(&self, id: &str) -> PathBuf {
        self.entry_path(id, HEADER_SUFFIX)
    }

    /// Pin an already-written header backup read-only and immutable.
    pub fn lock_header_backup(&self, id: &str) -> VaultResult<()> {
        let path = self.header_backup_path(id);
        if !path.is_file() {
            return Err(VaultError::NotEnrolled(id.to_string()));
        }
        fs::set_permissions(&path, fs::Permissions::from_mode(0o400))?;
        self.attrs.set_immutable(&path, true)?;
        Ok(())
    }

    /// Whether any per-disk state exists for `id`.
    pub fn any_entry_exists(&self, id: &str) -> bool {
        self.entry_path(id, KEYFILE_SUFFIX).exists()
            || self.entry_path(id, HEADER_SUFFIX).exists()
    }

    fn entry_path(&self, id: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{id}.{suffix}"))
    }
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).and_then(|file| file.sync_all())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records immutability requests instead of touching kernel flags.
    #[derive(Default)]
    struct RecordingAttrs {
        immutable: Mutex<HashSet<PathBuf>>,
    }

    impl FileAttributes for RecordingAttrs {
        type Error = VaultError;

        fn set_immutable(&self, path: &Path, on: bool) -> VaultResult<()> {
            let mut set = self.immutable.lock().unwrap();
            if on {
                set.insert(path.to_path_buf());
            } else {
                set.remove(path);
            }
            Ok(())
        }

        fn is_immutable(&self, path: &Path) -> VaultResult<bool> {
            Ok(self.immutable.lock().unwrap().contains(path))
        }
    }

    #[test]
    fn write_keyfile_sets_permissions_and_immutability() {
        let dir = tempdir().unwrap();
        let attrs = RecordingAttrs::default();
        let store = KeyfileStore::new(dir.path(), &attrs);

        let path = store.write_keyfile("WD-1234", &[0x42; 64]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![0x42; 64]);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o400);
        assert!(attrs.is_immutable(&path).unwrap());
    }

    #[test]
    fn second_write_for_same_id_is_rejected() {
        let dir = tempdir().unwrap();
        let attrs = RecordingAttrs::default();
        let store = KeyfileStore::new(dir.path(), &attrs);

        store.write_keyfile("WD-1234", &[1; 64]).unwrap();
        let err = store.write_keyfile("WD-1234", &[2; 64]).unwrap_err();
        assert!(matches!(err, VaultError::AlreadyEnrolled(id) if id == "WD-1234"));
    }

    #[test]
    fn list_enrolled_reports_keyfiles_only_in_order() {
        let dir = tempdir().unwrap();
        let attrs = RecordingAttrs::default();
        let store = KeyfileStore::new(dir.path(), &attrs);

        store.write_keyfile("serial-b", &[1; 64]).unwrap();
        store.write_keyfile("serial-a", &[2; 64]).unwrap();
        store.set_auto_attach("serial-b", false).unwrap();
        fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        assert_eq!(store.list_enrolled().unwrap(), vec!["serial-a", "serial-b"]);
    }

    #[test]
    fn keyfile_path_requires_enrollment() {
        let dir = tempdir().unwrap();
        let attrs = RecordingAttrs::default();
        let store = KeyfileStore::new(dir.path(), &attrs);
        let err = store.keyfile_path("ghost").unwrap_err();
        assert!(matches!(err, VaultError::NotEnrolled(_)));
    }

    #[test]
    fn auto_attach_defaults_on_and_round_trips() {
        let dir = tempdir().unwrap();
        let attrs = RecordingAttrs::default();
        let store = KeyfileStore::new(dir.path(), &attrs);

        assert!(store.auto_attach_enabled("WD-1"));
        store.set_auto_attach("WD-1", false).unwrap();
        assert!(!store.auto_attach_enabled("WD-1"));
        store.set_auto_attach("WD-1", true).unwrap();
        store.set_auto_attach("WD-1", true).unwrap();
        assert!(store.auto_attach_enabled("WD-1"));
    }
}
