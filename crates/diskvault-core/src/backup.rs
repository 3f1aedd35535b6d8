//! Keystore-backup freshness checks and refresh.
//!
//! Each member disk carries a raw copy of the keystore ciphertext in its
//! backup partition. The copy is eventually consistent: whenever a disk is
//! attached and its backup digest differs from the live keystore digest, the
//! backup is overwritten. The digest detects staleness only; it is not an
//! authentication mechanism.

use crate::error::{VaultError, VaultResult};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

const CHUNK: usize = 1024 * 1024;

/// Hex SHA-256 of the keystore container ciphertext.
pub fn ciphertext_digest(container: &Path) -> VaultResult<String> {
    let file = File::open(container)?;
    let len = file.metadata()?.len();
    digest_prefix(file, len)
}

/// Hex SHA-256 of the first `len` bytes of the backup partition.
///
/// The partition is larger than the container; only the container-length
/// prefix is meaningful.
pub fn backup_digest(partition: &Path, len: u64) -> VaultResult<String> {
    let file = File::open(partition)?;
    digest_prefix(file, len)
}

/// Overwrite the backup partition with the container ciphertext when stale.
///
/// Returns whether a write happened, so callers can report refresh activity
/// and tests can assert idempotence.
pub fn refresh_backup(
    container: &Path,
    partition: &Path,
    live_digest: &str,
) -> VaultResult<bool> {
    let len = std::fs::metadata(container)?.len();
    if backup_digest(partition, len)? == live_digest {
        return Ok(false);
    }

    let mut src = File::open(container)?;
    let mut dest = OpenOptions::new().write(true).open(partition)?;
    let mut buf = vec![0u8; CHUNK];
    loop {
        let read = src.read(&mut buf)?;
        if read == 0 {
            break;
        }
        dest.write_all(&buf[..read])?;
    }
    dest.sync_all()?;

    if backup_digest(partition, len)? != live_digest {
        return Err(VaultError::Operation(format!(
            "backup at {} still differs from keystore after refresh",
            partition.display()
        )));
    }
    Ok(true)
}

fn digest_prefix<R: Read>(mut reader: R, len: u64) -> VaultResult<String> {
    let mut hasher = Sha256::new();
    let mut remaining = len;
    let mut buf = vec![0u8; CHUNK];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let read = reader.read(&mut buf[..want])?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        remaining -= read as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn fresh_backup_is_left_untouched() {
        let dir = tempdir().unwrap();
        let container = dir.path().join("keystore.img");
        let partition = dir.path().join("backup.part");
        fs::write(&container, vec![7u8; 8192]).unwrap();
        // Partition holds the same prefix plus trailing garbage.
        let mut copy = vec![7u8; 8192];
        copy.extend_from_slice(&[0xFF; 512]);
        fs::write(&partition, copy).unwrap();

        let live = ciphertext_digest(&container).unwrap();
        assert!(!refresh_backup(&container, &partition, &live).unwrap());
    }

    #[test]
    fn stale_backup_is_rewritten_exactly_once() {
        let dir = tempdir().unwrap();
        let container = dir.path().join("keystore.img");
        let partition = dir.path().join("backup.part");
        fs::write(&container, vec![3u8; 8192]).unwrap();
        fs::write(&partition, vec![0u8; 9000]).unwrap();

        let live = ciphertext_digest(&container).unwrap();
        assert!(refresh_backup(&container, &partition, &live).unwrap());
        assert_eq!(backup_digest(&partition, 8192).unwrap(), live);
        // Second pass sees a fresh copy and writes nothing.
        assert!(!refresh_backup(&container, &partition, &live).unwrap());
    }

    #[test]
    fn short_backup_counts_as_stale() {
        let dir = tempdir().unwrap();
        let container = dir.path().join("keystore.img");
        let partition = dir.path().join("backup.part");
        fs::write(&container, vec![9u8; 4096]).unwrap();
        fs::write(&partition, vec![9u8; 100]).unwrap();

        let live = ciphertext_digest(&container).unwrap();
        assert!(refresh_backup(&container, &partition, &live).unwrap());
    }
}
