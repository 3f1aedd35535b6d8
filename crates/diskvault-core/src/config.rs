//! Configuration model and helpers used by diskvault services.

use crate::error::{VaultError, VaultResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/diskvault.toml";

const KEYSTORE_PATH_ENV: &str = "DISKVAULT_KEYSTORE";
const KEYSTORE_SIZE_ENV: &str = "DISKVAULT_KEYSTORE_MIB";
const EXTERNAL_KEYFILE_ENV: &str = "DISKVAULT_KEYFILE";
const MOUNTPOINT_ENV: &str = "DISKVAULT_MOUNTPOINT";
const BACKUP_TYPE_ENV: &str = "DISKVAULT_BACKUP_TYPE";
const DATA_TYPE_ENV: &str = "DISKVAULT_DATA_TYPE";
const DATA_SIZE_ENV: &str = "DISKVAULT_DATA_MIB";

/// Partition type for keystore-backup partitions. Deliberately not a
/// general-purpose filesystem type so provisioning tooling leaves it alone.
pub const DEFAULT_BACKUP_TYPE_GUID: &str = "5d3b1848-91e7-4a23-a0d8-1f310b84d1a5";

/// Partition type for encrypted data partitions. Distinct from the backup
/// type and from anything mountable out of the box.
pub const DEFAULT_DATA_TYPE_GUID: &str = "8f1c64d3-26b4-4f82-9c2d-62e17c7d45b9";

pub fn default_config_path() -> &'static Path {
    Path::new(DEFAULT_CONFIG_PATH)
}

fn default_keystore_path() -> PathBuf {
    PathBuf::from("/var/lib/diskvault/keystore.img")
}

fn default_keystore_size_mib() -> u64 {
    64
}

fn default_mountpoint() -> PathBuf {
    PathBuf::from("/run/diskvault/keystore")
}

fn default_backup_type_guid() -> String {
    DEFAULT_BACKUP_TYPE_GUID.to_string()
}

fn default_data_type_guid() -> String {
    DEFAULT_DATA_TYPE_GUID.to_string()
}

fn default_backup_size_mib() -> u64 {
    64
}

fn default_timeout_secs() -> u64 {
    30
}

/// Keystore container location, size, and unlock parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreCfg {
    #[serde(default = "default_keystore_path")]
    pub path: PathBuf,

    /// Container size in MiB.
    #[serde(default = "default_keystore_size_mib")]
    pub size_mib: u64,

    /// Optional external key file mixed into the keystore secret.
    #[serde(default)]
    pub external_keyfile: Option<PathBuf>,

    /// Optional KDF iteration count override for keystore creation.
    #[serde(default)]
    pub kdf_iterations: Option<u32>,

    #[serde(default = "default_mountpoint")]
    pub mountpoint: PathBuf,
}

impl Default for KeystoreCfg {
    fn default() -> Self {
        Self {
            path: default_keystore_path(),
            size_mib: default_keystore_size_mib(),
            external_keyfile: None,
            kdf_iterations: None,
            mountpoint: default_mountpoint(),
        }
    }
}

/// Member-disk layout parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCfg {
    #[serde(default = "default_backup_type_guid")]
    pub backup_type_guid: String,

    #[serde(default = "default_data_type_guid")]
    pub data_type_guid: String,

    /// Keystore-backup partition size in MiB; must hold the container.
    #[serde(default = "default_backup_size_mib")]
    pub backup_size_mib: u64,

    /// Fixed data partition size in MiB; derived from capacity when unset.
    #[serde(default)]
    pub data_size_mib: Option<u64>,
}

impl Default for DiskCfg {
    fn default() -> Self {
        Self {
            backup_type_guid: default_backup_type_guid(),
            data_type_guid: default_data_type_guid(),
            backup_size_mib: default_backup_size_mib(),
            data_size_mib: None,
        }
    }
}

/// Timeouts for host command invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoCfg {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CryptoCfg {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub keystore: KeystoreCfg,

    #[serde(default)]
    pub disk: DiskCfg,

    #[serde(default)]
    pub crypto: CryptoCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl VaultConfig {
    /// Load configuration from `path`, falling back to built-in defaults when
    /// the file is absent. Environment overrides apply either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let target = path.as_ref();
        let mut config = if target.exists() {
            let contents = fs::read_to_string(target)?;
            let parsed: VaultConfig = toml::from_str(&contents).map_err(|err| {
                VaultError::InvalidConfig(format!("{}: {err}", target.display()))
            })?;
            parsed
        } else {
            info!(
                "no configuration at {}; using built-in defaults",
                target.display()
            );
            VaultConfig::default()
        };
        config.path = target.to_path_buf();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Fold `DISKVAULT_*` environment variables over the parsed values.
    fn apply_env_overrides(&mut self) -> VaultResult<()> {
        if let Some(value) = env_string(KEYSTORE_PATH_ENV) {
            self.keystore.path = PathBuf::from(value);
        }
        if let Some(value) = env_string(KEYSTORE_SIZE_ENV) {
            self.keystore.size_mib = parse_mib(KEYSTORE_SIZE_ENV, &value)?;
        }
        if let Some(value) = env_string(EXTERNAL_KEYFILE_ENV) {
            self.keystore.external_keyfile = Some(PathBuf::from(value));
        }
        if let Some(value) = env_string(MOUNTPOINT_ENV) {
            self.keystore.mountpoint = PathBuf::from(value);
        }
        if let Some(value) = env_string(BACKUP_TYPE_ENV) {
            self.disk.backup_type_guid = value;
        }
        if let Some(value) = env_string(DATA_TYPE_ENV) {
            self.disk.data_type_guid = value;
        }
        if let Some(value) = env_string(DATA_SIZE_ENV) {
            self.disk.data_size_mib = Some(parse_mib(DATA_SIZE_ENV, &value)?);
        }
        Ok(())
    }

    /// Keystore container size in bytes.
    pub fn keystore_bytes(&self) -> u64 {
        self.keystore.size_mib * 1024 * 1024
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_mib(origin: &str, value: &str) -> VaultResult<u64> {
    value.trim().parse::<u64>().map_err(|err| {
        VaultError::InvalidConfig(format!("{origin} must be a size in MiB: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_when_file_is_missing() {
        let dir = tempdir().unwrap();
        let config = VaultConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.keystore.size_mib, 64);
        assert_eq!(config.disk.backup_type_guid, DEFAULT_BACKUP_TYPE_GUID);
        assert!(config.disk.data_size_mib.is_none());
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diskvault.toml");
        fs::write(
            &path,
            "[keystore]\nsize_mib = 128\n\n[disk]\ndata_size_mib = 4096\n",
        )
        .unwrap();
        let config = VaultConfig::load_or_default(&path).unwrap();
        assert_eq!(config.keystore.size_mib, 128);
        assert_eq!(config.disk.data_size_mib, Some(4096));
        assert_eq!(config.crypto.timeout_secs, 30);
        assert_eq!(config.path, path);
    }

    #[test]
    fn malformed_file_is_an_invalid_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "keystore = 12").unwrap();
        let err = VaultConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfig(_)));
    }
}
