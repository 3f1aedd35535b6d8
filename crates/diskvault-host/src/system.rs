//! System-backed provider implementing every diskvault capability contract.
//!
//! One struct carries all six capabilities so orchestration can take a single
//! `Host` value; each capability is a thin veneer over the matching binary.

use crate::command::{HostCommand, Output};
use diskvault_core::error::{VaultError, VaultResult};
use diskvault_core::VaultConfig;
use diskvault_provider::{
    CryptoPolicy, CryptoProvider, DeviceCatalog, DiskIdentity, FileAttributes, LoopDevice,
    PartitionSpec, PartitionTable, ProviderState, VolumeMount,
};
use log::{debug, warn};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEV_MAPPER: &str = "/dev/mapper";
const BY_PARTLABEL: &str = "/dev/disk/by-partlabel";
const PROC_MOUNTS: &str = "/proc/self/mounts";

const SBIN_DIRS: &[&str] = &[
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
    "/usr/local/sbin",
];

/// System provider that drives the host's block-device tooling.
#[derive(Debug, Clone)]
pub struct SystemHostProvider {
    cryptsetup: HostCommand,
    sgdisk: HostCommand,
    losetup: HostCommand,
    mount_bin: HostCommand,
    umount_bin: HostCommand,
    mkfs: HostCommand,
    chattr: HostCommand,
    lsattr: HostCommand,
    lsblk: HostCommand,
    blockdev: HostCommand,
    staged: Arc<Mutex<HashMap<String, Vec<(u32, PartitionSpec)>>>>,
}

impl SystemHostProvider {
    /// Build a provider from configuration, resolving every required binary
    /// up front so missing tooling fails loudly before any device is touched.
    pub fn from_config(config: &VaultConfig) -> VaultResult<Self> {
        let timeout = Duration::from_secs(config.crypto.timeout_secs);
        let tool = |name: &str| -> VaultResult<HostCommand> {
            Ok(HostCommand::new(resolve_binary(name)?, timeout))
        };

        Ok(Self {
            cryptsetup: tool("cryptsetup")?,
            sgdisk: tool("sgdisk")?,
            losetup: tool("losetup")?,
            mount_bin: tool("mount")?,
            umount_bin: tool("umount")?,
            mkfs: tool("mkfs.ext4")?,
            chattr: tool("chattr")?,
            lsattr: tool("lsattr")?,
            lsblk: tool("lsblk")?,
            blockdev: tool("blockdev")?,
            staged: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn mapper_node_exists(name: &str) -> bool {
        let root = Path::new(DEV_MAPPER);
        root.is_dir() && root.join(name).exists()
    }
}

impl CryptoProvider for SystemHostProvider {
    type Error = VaultError;

    fn init(
        &self,
        source: &str,
        keyfile: Option<&Path>,
        policy: &CryptoPolicy,
    ) -> VaultResult<()> {
        let mut args = vec!["luksFormat".to_string(), "--batch-mode".to_string()];
        if let Some(iterations) = policy.kdf_iterations {
            args.push("--pbkdf-force-iterations".to_string());
            args.push(iterations.to_string());
        }
        match keyfile {
            Some(path) => {
                args.push("--key-file".to_string());
                args.push(path.to_string_lossy().into_owned());
                args.push(source.to_string());
                let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                self.cryptsetup.run_checked(&refs, None)?;
            }
            None => {
                // The operator types the passphrase on the controlling tty.
                args.push("--verify-passphrase".to_string());
                args.push(source.to_string());
                let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                self.cryptsetup.run_interactive(&refs)?;
            }
        }
        Ok(())
    }

    fn attach(&self, source: &str, name: &str, keyfile: Option<&Path>) -> VaultResult<()> {
        if Self::mapper_node_exists(name) {
            debug!("wrapper {name} already present under {DEV_MAPPER}");
            return Ok(());
        }

        let mut args = vec![
            "open".to_string(),
            "--type".to_string(),
            "luks".to_string(),
        ];
        match keyfile {
            Some(path) => {
                args.push("--batch-mode".to_string());
                args.push("--key-file".to_string());
                args.push(path.to_string_lossy().into_owned());
                args.push(source.to_string());
                args.push(name.to_string());
                let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                self.cryptsetup.run_checked(&refs, None)?;
            }
            None => {
                args.push(source.to_string());
                args.push(name.to_string());
                let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                self.cryptsetup.run_interactive(&refs)?;
            }
        }

        if !Self::mapper_node_exists(name) {
            return Err(VaultError::Operation(format!(
                "cryptsetup reported success but {DEV_MAPPER}/{name} did not appear"
            )));
        }
        Ok(())
    }

    fn detach(&self, name: &str) -> VaultResult<()> {
        let out = self.cryptsetup.run(&["close", name], None)?;
        if out.status == 0 || absent_is_benign(&out) {
            return Ok(());
        }
        Err(VaultError::Operation(format!(
            "cryptsetup failed to close wrapper `{name}` (exit code {}): {}",
            out.status,
            out.diagnostic()
        )))
    }

    fn state(&self, name: &str) -> VaultResult<ProviderState> {
        if Self::mapper_node_exists(name) {
            return Ok(ProviderState::Attached);
        }
        let out = self.cryptsetup.run(&["status", name], None)?;
        Ok(classify_status(name, out.status, &out.diagnostic()))
    }

    fn backup_header(&self, source: &str, dest: &Path) -> VaultResult<()> {
        self.cryptsetup.run_checked(
            &[
                "luksHeaderBackup",
                source,
                "--header-backup-file",
                &dest.to_string_lossy(),
            ],
            None,
        )?;
        Ok(())
    }

    fn device_node(&self, name: &str) -> PathBuf {
        Path::new(DEV_MAPPER).join(name)
    }
}

impl PartitionTable for SystemHostProvider {
    type Error = VaultError;

    fn create_table(&self, device: &str) -> VaultResult<()> {
        self.staged
            .lock()
            .unwrap()
            .insert(device.to_string(), Vec::new());
        Ok(())
    }

    fn add_partition(&self, device: &str, index: u32, spec: &PartitionSpec) -> VaultResult<()> {
        let mut staged = self.staged.lock().unwrap();
        let edits = staged.get_mut(device).ok_or_else(|| {
            VaultError::Operation(format!("no staged partition table for {device}"))
        })?;
        edits.push((index, spec.clone()));
        Ok(())
    }

    fn commit(&self, device: &str) -> VaultResult<()> {
        let edits = self
            .staged
            .lock()
            .unwrap()
            .remove(device)
            .ok_or_else(|| {
                VaultError::Operation(format!("no staged partition table for {device}"))
            })?;

        let args = sgdisk_args(device, &edits);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.sgdisk.run_checked(&refs, None)?;

        if let Err(err) = self.blockdev.run_checked(&["--rereadpt", device], None) {
            warn!("partition table reread on {device} failed: {err}");
        }
        Ok(())
    }

    fn discard(&self, device: &str) -> VaultResult<()> {
        self.staged.lock().unwrap().remove(device);
        Ok(())
    }
}

impl VolumeMount for SystemHostProvider {
    type Error = VaultError;

    fn make_filesystem(&self, device: &Path) -> VaultResult<()> {
        self.mkfs
            .run_checked(&["-q", &device.to_string_lossy()], None)?;
        Ok(())
    }

    fn mount(&self, device: &Path, mountpoint: &Path, read_only: bool) -> VaultResult<()> {
        let device = device.to_string_lossy();
        let mountpoint = mountpoint.to_string_lossy();
        let mut args = Vec::new();
        if read_only {
            args.push("-o");
            args.push("ro");
        }
        args.push(device.as_ref());
        args.push(mountpoint.as_ref());
        self.mount_bin.run_checked(&args, None)?;
        Ok(())
    }

    fn unmount(&self, mountpoint: &Path) -> VaultResult<()> {
        let out = self
            .umount_bin
            .run(&[&mountpoint.to_string_lossy()], None)?;
        if out.status == 0 || out.diagnostic().to_ascii_lowercase().contains("not mounted") {
            return Ok(());
        }
        Err(VaultError::Operation(format!(
            "umount {} failed (exit code {}): {}",
            mountpoint.display(),
            out.status,
            out.diagnostic()
        )))
    }

    fn is_mounted(&self, mountpoint: &Path) -> VaultResult<bool> {
        let table = fs::read_to_string(PROC_MOUNTS)?;
        Ok(mount_table_contains(&table, mountpoint))
    }
}

impl LoopDevice for SystemHostProvider {
    type Error = VaultError;

    fn attach_loop(&self, file: &Path, read_only: bool) -> VaultResult<String> {
        let file = file.to_string_lossy();
        let mut args = vec!["--find", "--show"];
        if read_only {
            args.push("--read-only");
        }
        args.push(file.as_ref());
        let out = self.losetup.run_checked(&args, None)?;
        let node = out.stdout.trim().to_string();
        if node.is_empty() {
            return Err(VaultError::Operation(
                "losetup returned no device node".into(),
            ));
        }
        Ok(node)
    }

    fn detach_loop(&self, node: &str) -> VaultResult<()> {
        let out = self.losetup.run(&["--detach", node], None)?;
        if out.status == 0 || absent_is_benign(&out) {
            return Ok(());
        }
        Err(VaultError::Operation(format!(
            "losetup failed to detach {node} (exit code {}): {}",
            out.status,
            out.diagnostic()
        )))
    }

    fn find_loop(&self, file: &Path) -> VaultResult<Option<String>> {
        let out = self
            .losetup
            .run_checked(&["--associated", &file.to_string_lossy()], None)?;
        Ok(parse_loop_listing(&out.stdout))
    }
}

impl DeviceCatalog for SystemHostProvider {
    type Error = VaultError;

    fn resolve(&self, reference: &str) -> VaultResult<DiskIdentity> {
        // Path or short device name first, then fall back to a serial scan.
        let node = if reference.starts_with('/') {
            Path::new(reference)
                .exists()
                .then(|| reference.to_string())
        } else {
            let candidate = Path::new("/dev").join(reference);
            candidate
                .exists()
                .then(|| candidate.to_string_lossy().into_owned())
        };

        if let Some(node) = node {
            let out = self
                .lsblk
                .run_checked(&["-dn", "-o", "SERIAL", &node], None)?;
            let serial = out.stdout.trim().to_string();
            if serial.is_empty() {
                return Err(VaultError::DeviceNotFound(format!(
                    "{reference}: device has no serial identifier"
                )));
            }
            return Ok(DiskIdentity { serial, node });
        }

        let out = self
            .lsblk
            .run_checked(&["-dn", "-o", "PATH,SERIAL"], None)?;
        parse_serial_listing(&out.stdout)
            .into_iter()
            .find(|identity| identity.serial == reference)
            .ok_or_else(|| VaultError::DeviceNotFound(reference.to_string()))
    }

    fn size_bytes(&self, node: &str) -> VaultResult<u64> {
        let out = self.blockdev.run_checked(&["--getsize64", node], None)?;
        out.stdout.trim().parse::<u64>().map_err(|err| {
            VaultError::Operation(format!("unparseable size for {node}: {err}"))
        })
    }

    fn has_partition_table(&self, node: &str) -> VaultResult<bool> {
        // PTTYPE reports the table itself, so an initialized-but-empty GPT
        // still counts as partitioned.
        let out = self
            .lsblk
            .run_checked(&["-dn", "-o", "PTTYPE", node], None)?;
        Ok(has_partition_table_type(&out.stdout))
    }

    fn partition_node(&self, label: &str) -> VaultResult<Option<PathBuf>> {
        let link = Path::new(BY_PARTLABEL).join(label);
        if !link.exists() {
            return Ok(None);
        }
        Ok(Some(fs::canonicalize(&link)?))
    }
}

impl FileAttributes for SystemHostProvider {
    type Error = VaultError;

    fn set_immutable(&self, path: &Path, on: bool) -> VaultResult<()> {
        let flag = if on { "+i" } else { "-i" };
        self.chattr
            .run_checked(&[flag, &path.to_string_lossy()], None)?;
        Ok(())
    }

    fn is_immutable(&self, path: &Path) -> VaultResult<bool> {
        let out = self
            .lsattr
            .run_checked(&["-d", &path.to_string_lossy()], None)?;
        Ok(lsattr_has_immutable(&out.stdout))
    }
}

fn resolve_binary(name: &str) -> VaultResult<PathBuf> {
    for dir in SBIN_DIRS {
        let candidate = Path::new(dir).join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    find_in_path(name).ok_or_else(|| {
        VaultError::InvalidConfig(format!(
            "unable to locate `{name}`; tried {SBIN_DIRS:?} and PATH"
        ))
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    })
}

fn absent_is_benign(out: &Output) -> bool {
    let diagnostic = out.diagnostic().to_ascii_lowercase();
    diagnostic.contains("does not exist")
        || diagnostic.contains("doesn't exist")
        || diagnostic.contains("not active")
        || diagnostic.contains("no such device")
        || diagnostic.contains("no such file")
}

fn classify_status(name: &str, code: i32, diagnostic: &str) -> ProviderState {
    match code {
        0 => return ProviderState::Attached,
        4 => return ProviderState::Detached,
        _ => {}
    }

    let lower = diagnostic.to_ascii_lowercase();
    if lower.contains("is inactive")
        || lower.contains("not active")
        || lower.contains("does not exist")
        || lower.contains("doesn't exist")
    {
        return ProviderState::Detached;
    }

    ProviderState::Unknown(format!(
        "cryptsetup status {name} exited with code {code}: {diagnostic}"
    ))
}

/// Build the single sgdisk invocation that realises staged edits: wipe
/// whatever is on the device, then add each partition with its size, label,
/// and type identifier.
fn sgdisk_args(device: &str, edits: &[(u32, PartitionSpec)]) -> Vec<String> {
    let mut args = vec!["--zap-all".to_string()];
    for (index, spec) in edits {
        let size = match spec.size_mib {
            Some(mib) => format!("0:+{mib}M"),
            None => "0:0".to_string(),
        };
        args.push("--new".to_string());
        args.push(format!("{index}:{size}"));
        args.push("--change-name".to_string());
        args.push(format!("{index}:{}", spec.label));
        args.push("--typecode".to_string());
        args.push(format!("{index}:{}", spec.type_guid));
    }
    args.push(device.to_string());
    args
}

/// First device node in `losetup --associated` output, which looks like
/// `/dev/loop3: [64768]:131 (/var/lib/diskvault/keystore.img)`.
fn parse_loop_listing(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .map(str::to_string)
}

/// `PATH SERIAL` pairs from `lsblk -dn -o PATH,SERIAL`; rows without a serial
/// column are skipped.
fn parse_serial_listing(stdout: &str) -> Vec<DiskIdentity> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let node = fields.next()?;
            let serial = fields.next()?;
            Some(DiskIdentity {
                serial: serial.to_string(),
                node: node.to_string(),
            })
        })
        .collect()
}

/// Whether `lsblk -dn -o PTTYPE` reported a partition-table type (`gpt`,
/// `dos`, ...). Blank output means no table at all.
fn has_partition_table_type(stdout: &str) -> bool {
    !stdout.trim().is_empty()
}

/// Whether the mount table names `mountpoint` as a target. Mount entries
/// escape spaces as `\040`.
fn mount_table_contains(table: &str, mountpoint: &Path) -> bool {
    let wanted = mountpoint.to_string_lossy().replace(' ', "\\040");
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| target == wanted)
}

/// Whether the flags field of `lsattr -d` output carries the immutable bit,
/// e.g. `----i---------e------- /var/lib/diskvault/keystore.img`.
fn lsattr_has_immutable(stdout: &str) -> bool {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|flags| flags.contains('i'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_covers_exit_codes_and_text() {
        assert_eq!(classify_status("ks", 0, ""), ProviderState::Attached);
        assert_eq!(classify_status("ks", 4, ""), ProviderState::Detached);
        assert_eq!(
            classify_status("ks", 1, "Device ks is inactive."),
            ProviderState::Detached
        );
        assert!(matches!(
            classify_status("ks", 2, "something odd"),
            ProviderState::Unknown(_)
        ));
    }

    #[test]
    fn loop_listing_yields_the_device_node() {
        let stdout = "/dev/loop3: [64768]:131 (/var/lib/diskvault/keystore.img)\n";
        assert_eq!(parse_loop_listing(stdout), Some("/dev/loop3".to_string()));
        assert_eq!(parse_loop_listing(""), None);
    }

    #[test]
    fn serial_listing_skips_rows_without_a_serial() {
        let stdout = "/dev/sda WD-WCC4N5XK\n/dev/sdb\n/dev/sdc Z1D2E3F4\n";
        let listing = parse_serial_listing(stdout);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].serial, "WD-WCC4N5XK");
        assert_eq!(listing[1].node, "/dev/sdc");
    }

    #[test]
    fn sgdisk_invocation_orders_wipe_partitions_device() {
        let edits = vec![
            (
                1,
                PartitionSpec {
                    label: "SER.keystore".into(),
                    type_guid: "aaaa".into(),
                    size_mib: Some(64),
                },
            ),
            (
                2,
                PartitionSpec {
                    label: "SER".into(),
                    type_guid: "bbbb".into(),
                    size_mib: None,
                },
            ),
        ];
        let args = sgdisk_args("/dev/sdx", &edits);
        assert_eq!(args[0], "--zap-all");
        assert_eq!(args[1..3], ["--new".to_string(), "1:0:+64M".to_string()]);
        assert!(args.contains(&"1:SER.keystore".to_string()));
        assert!(args.contains(&"2:0:0".to_string()));
        assert!(args.contains(&"2:bbbb".to_string()));
        assert_eq!(args.last().unwrap(), "/dev/sdx");
    }

    #[test]
    fn any_table_type_counts_as_partitioned() {
        // An empty GPT has no partition rows but still carries a table.
        assert!(has_partition_table_type("gpt\n"));
        assert!(has_partition_table_type("dos\n"));
        assert!(!has_partition_table_type("\n"));
        assert!(!has_partition_table_type(""));
    }

    #[test]
    fn mount_table_handles_escaped_spaces() {
        let table = "\
/dev/mapper/diskvault-ks /run/diskvault/keystore ext4 ro 0 0
/dev/sda1 /mnt/spare\\040disk ext4 rw 0 0
";
        assert!(mount_table_contains(
            table,
            Path::new("/run/diskvault/keystore")
        ));
        assert!(mount_table_contains(table, Path::new("/mnt/spare disk")));
        assert!(!mount_table_contains(table, Path::new("/run/diskvault")));
    }

    #[test]
    fn lsattr_flags_detect_the_immutable_bit() {
        assert!(lsattr_has_immutable(
            "----i---------e------- /var/lib/diskvault/keystore.img\n"
        ));
        assert!(!lsattr_has_immutable(
            "--------------e------- /var/lib/diskvault/keystore.img\n"
        ));
    }
}
