use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

/// One file listed in a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// File name relative to the listed folder (e.g. `genres.json`)
    pub name: String,
    /// Canonical path usable with `get_metadata` and `download`
    pub canonical_path: String,
    /// Opaque revision tag (ETag, rev id, ...)
    pub revision: String,
}

/// Metadata for a single remote path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub revision: String,
}

/// Continuation cursor for a paginated folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderCursor {
    /// Folder the listing started from
    pub folder: String,
    /// Backend-specific continuation token
    pub token: String,
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPage {
    pub entries: Vec<RemoteEntry>,
    /// Present while more pages remain
    pub cursor: Option<FolderCursor>,
}

/// Remote object-storage client consumed by the engine.
///
/// The engine only reads from the remote side. Implementations exist for
/// S3-compatible stores; tests use in-memory fakes.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Returns the backend identifier (e.g., "s3", "r2").
    fn backend_name(&self) -> &'static str;

    /// Whether remote calls may be attempted at all.
    fn is_authorized(&self) -> bool;

    /// List the first page of a folder.
    async fn list_folder(&self, path: &str) -> SyncResult<FolderPage>;

    /// List the page following `cursor`.
    async fn list_folder_continue(&self, cursor: &FolderCursor) -> SyncResult<FolderPage>;

    /// Fetch the revision of a single file. Fails if `path` is not a file.
    async fn get_metadata(&self, path: &str) -> SyncResult<RemoteMetadata>;

    /// Download the bytes of a single file.
    async fn download(&self, path: &str) -> SyncResult<Vec<u8>>;

    /// List a folder, following cursors until the listing is exhausted.
    async fn list_folder_all(&self, path: &str) -> SyncResult<Vec<RemoteEntry>> {
        let mut page = self.list_folder(path).await?;
        let mut entries = std::mem::take(&mut page.entries);

        while let Some(cursor) = page.cursor.take() {
            page = self.list_folder_continue(&cursor).await?;
            entries.append(&mut page.entries);
        }

        Ok(entries)
    }
}
