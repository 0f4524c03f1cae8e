//! Backup collaborator used by the session coordinator for file-level
//! rollback.
//!
//! A backup is a byte-for-byte copy of the package taken before the session
//! opens it for writing. Each copy is verified by SHA-256 digest when it is
//! written and again when it is restored.
//!
//! Backups are named `<file name>.<UTC timestamp>.<short uuid>.bak` and
//! placed in the configured directory, or in a `.lnk-backups` directory
//! next to the original file.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::SessionError;
use crate::package::persist_bytes;

pub const DEFAULT_BACKUP_DIR: &str = ".lnk-backups";

/// Creates and restores file-level backups.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Copy `path` aside and return the backup's location.
    async fn create_backup(&self, path: &Path) -> Result<PathBuf, SessionError>;

    /// Put `backup` back in place of `original`.
    ///
    /// `Ok(false)` means the backup could not be used (missing, or its
    /// content no longer matches after the copy).
    async fn restore(&self, original: &Path, backup: &Path) -> Result<bool, SessionError>;
}

/// Backups on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsBackupStore {
    dir: Option<PathBuf>,
}

impl FsBackupStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Directory that receives the backup of `original`.
    pub fn backup_dir_for(&self, original: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => original
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_BACKUP_DIR),
        }
    }

    fn backup_name(original: &Path) -> String {
        let file_name = original
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}.{}.{}.bak", file_name, stamp, &id[..8])
    }
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn create_backup(&self, path: &Path) -> Result<PathBuf, SessionError> {
        let bytes = tokio::fs::read(path).await?;
        let dir = self.backup_dir_for(path);
        tokio::fs::create_dir_all(&dir).await?;

        let backup = dir.join(Self::backup_name(path));
        tokio::fs::write(&backup, &bytes).await?;

        let written = tokio::fs::read(&backup).await?;
        if digest(&written) != digest(&bytes) {
            let _ = tokio::fs::remove_file(&backup).await;
            return Err(SessionError::Backup(format!(
                "backup of {} failed verification",
                path.display()
            )));
        }
        tracing::debug!(
            original = %path.display(),
            backup = %backup.display(),
            bytes = bytes.len(),
            "backup created"
        );
        Ok(backup)
    }

    async fn restore(&self, original: &Path, backup: &Path) -> Result<bool, SessionError> {
        let bytes = match tokio::fs::read(backup).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(backup = %backup.display(), "backup file is missing");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let expected = digest(&bytes);

        let original_buf = original.to_path_buf();
        tokio::task::spawn_blocking(move || persist_bytes(&original_buf, &bytes))
            .await
            .map_err(|e| SessionError::Backup(format!("restore task failed: {}", e)))??;

        let restored = tokio::fs::read(original).await?;
        let ok = digest(&restored) == expected;
        if ok {
            tracing::info!(original = %original.display(), "restored from backup");
        } else {
            tracing::warn!(original = %original.display(), "restored file does not match backup");
        }
        Ok(ok)
    }
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
