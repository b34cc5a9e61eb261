use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::error::{SyncError, SyncResult};

/// Local durable store for mirrored documents.
///
/// Every catalog item is stored flat under one dedicated directory:
/// ```text
/// {root}/
///   {dir_name}/
///     genres.json
///     languages.json
/// ```
/// The directory contents are the whole persisted state; there is no
/// manifest and revisions are never written to disk.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    dir_name: String,
}

impl LocalStore {
    /// Create a store rooted at an explicit application-private directory.
    pub fn new(root: impl AsRef<Path>, dir_name: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            dir_name: dir_name.into(),
        }
    }

    /// Create a store under the platform's local data directory.
    pub fn from_platform(app_name: &str, dir_name: impl Into<String>) -> SyncResult<Self> {
        let base = dirs::data_local_dir().ok_or_else(|| {
            SyncError::Environment("platform local data directory is unavailable".to_string())
        })?;
        Ok(Self::new(base.join(app_name), dir_name))
    }

    /// Directory holding the mirrored files.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.dir_name)
    }

    /// Resolve the local path of a file name, creating the cache directory
    /// on first use.
    pub fn resolve_local_path(&self, file_name: &str) -> SyncResult<PathBuf> {
        let dir = self.cache_dir();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SyncError::Environment(format!(
                "Failed to create cache dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(dir.join(file_name))
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Write via a temporary sibling and rename, so a failed write leaves
    /// the previous file intact.
    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    pub async fn write_atomic(&self, path: &Path, data: &[u8]) -> SyncResult<()> {
        let temp_path = Self::sibling(path, "tmp")?;
        Self::write_new(&temp_path, data).await?;
        self.commit_staged(&temp_path, path).await?;

        debug!("Wrote {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    /// Write `data` next to `path` without replacing it. The returned path
    /// is later moved into place by [`LocalStore::commit_staged`] or removed
    /// by [`LocalStore::discard_staged`].
    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    pub async fn stage(&self, path: &Path, data: &[u8]) -> SyncResult<PathBuf> {
        let staged_path = Self::sibling(path, "staged")?;
        Self::write_new(&staged_path, data).await?;
        Ok(staged_path)
    }

    /// Move a staged file onto its target.
    pub async fn commit_staged(&self, staged_path: &Path, path: &Path) -> SyncResult<()> {
        if let Err(e) = fs::rename(staged_path, path).await {
            warn!("Failed to move {} into place: {}", staged_path.display(), e);
            let _ = fs::remove_file(staged_path).await;
            return Err(SyncError::Io(format!(
                "Failed to rename to {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }

    /// Remove a staged file that will not be committed.
    pub async fn discard_staged(&self, staged_path: &Path) {
        if let Err(e) = fs::remove_file(staged_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", staged_path.display(), e);
            }
        }
    }

    /// Hidden sibling of `path`: `.{name}.{suffix}`.
    fn sibling(path: &Path, suffix: &str) -> SyncResult<PathBuf> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::Io(format!("Invalid file path {}", path.display())))?;
        Ok(path.with_file_name(format!(".{}.{}", file_name, suffix)))
    }

    async fn write_new(path: &Path, data: &[u8]) -> SyncResult<()> {
        if let Err(e) = fs::write(path, data).await {
            let _ = fs::remove_file(path).await;
            return Err(SyncError::Io(format!(
                "Failed to write {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }

    pub fn read(&self, path: &Path) -> SyncResult<Vec<u8>> {
        std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SyncError::NotFound(path.display().to_string())
            } else {
                SyncError::Io(format!("Failed to read {}: {}", path.display(), e))
            }
        })
    }
}
