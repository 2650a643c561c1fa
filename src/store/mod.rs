//! On-disk stores: wallet index + per-wallet keystore files, and the
//! parallel signing-key store. Shares one error type, one atomic-write
//! helper, and one process-wide advisory mutex discipline across both
//! concrete stores.

pub mod signing_key_store;
pub mod wallet_store;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("encryption error: {0}")]
    Encryption(#[from] crate::crypto::encryption::EncryptionError),

    #[error("derivation error: {0}")]
    Derivation(#[from] crate::derivation::DerivationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("wrong password")]
    WrongPassword,

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("rollback failed after verification failure: original error: {original}; rollback error: {rollback}")]
    RollbackFailed { original: String, rollback: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::WrongPassword => ErrorKind::WrongPassword,
            StoreError::Integrity(_) => ErrorKind::IntegrityError,
            StoreError::Encryption(e) => e.kind(),
            StoreError::Derivation(e) => e.kind(),
            StoreError::Io(_) | StoreError::Serde(_) | StoreError::RollbackFailed { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

/// Writes `contents` to `path` atomically: write to a temp sibling in the
/// same directory, fsync it so the bytes are durable, set owner-only
/// permissions, then rename over the target. Rename is atomic on POSIX
/// filesystems, so a crash never leaves a torn file in place, and the fsync
/// ensures the rename can't land before the data it points at is on disk.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;
    fs::create_dir_all(dir)?;

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        uuid::Uuid::new_v4()
    );
    let tmp_path = dir.join(tmp_name);

    let mut file = File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    set_owner_only_permissions(&tmp_path)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn ensure_owner_only_dir(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(path)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn ensure_owner_only_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path)?;
    Ok(())
}
