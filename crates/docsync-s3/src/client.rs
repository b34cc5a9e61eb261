use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sdk_s3::Client as S3Client;
use docsync_core::{
    FolderCursor, FolderPage, RemoteClient, RemoteEntry, RemoteMetadata, SyncError, SyncResult,
};
use tracing::{debug, instrument, warn};

/// Remote client for S3-compatible object stores (AWS S3, Cloudflare R2).
///
/// Folder paths map onto key prefixes:
/// ```text
/// /JSONs            -> prefix "JSONs/"
/// /JSONs/genres.json -> key "JSONs/genres.json"
/// ```
/// Only direct children of a folder are listed. The ETag, without its
/// quotes, is the revision tag.
#[derive(Clone)]
pub struct S3RemoteClient {
    s3_client: S3Client,
    bucket_name: String,
    authorized: bool,
}

impl std::fmt::Debug for S3RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3RemoteClient")
            .field("bucket_name", &self.bucket_name)
            .field("authorized", &self.authorized)
            .finish_non_exhaustive()
    }
}

impl S3RemoteClient {
    /// Create a new client. `authorized` reflects whether credentials were
    /// resolved for `s3_client`.
    pub fn new(s3_client: S3Client, bucket_name: String, authorized: bool) -> Self {
        Self {
            s3_client,
            bucket_name,
            authorized,
        }
    }

    /// Key prefix of a folder path.
    fn folder_prefix(path: &str) -> String {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        }
    }

    /// Object key of a file path.
    fn object_key(path: &str) -> &str {
        path.trim_start_matches('/')
    }

    /// Canonical path reported for an object key.
    fn canonical_path(key: &str) -> String {
        format!("/{}", key)
    }

    /// Name of a direct child of `prefix`, if `key` is one.
    fn child_name<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(prefix)
            .filter(|name| !name.is_empty() && !name.contains('/'))
    }

    fn revision(e_tag: Option<String>) -> Option<String> {
        e_tag
            .map(|tag| tag.trim_matches('"').to_string())
            .filter(|tag| !tag.is_empty())
    }

    /// List one page of a folder.
    async fn list_page(&self, folder: &str, token: Option<String>) -> SyncResult<FolderPage> {
        let prefix = Self::folder_prefix(folder);

        let mut request = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket_name)
            .prefix(&prefix)
            .delimiter("/");

        if let Some(token) = token {
            request = request.continuation_token(token);
        }

        let output = request
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("S3 list_objects error: {}", e)))?;

        let mut entries = Vec::new();
        if let Some(contents) = output.contents {
            for obj in contents {
                let Some(key) = obj.key else {
                    continue;
                };
                let Some(name) = Self::child_name(&prefix, &key) else {
                    continue;
                };
                let Some(revision) = Self::revision(obj.e_tag) else {
                    debug!("Skipping {} without ETag", key);
                    continue;
                };
                entries.push(RemoteEntry {
                    name: name.to_string(),
                    canonical_path: Self::canonical_path(&key),
                    revision,
                });
            }
        }

        let cursor = if output.is_truncated.unwrap_or(false) {
            output.next_continuation_token.map(|token| FolderCursor {
                folder: folder.to_string(),
                token,
            })
        } else {
            None
        };

        Ok(FolderPage { entries, cursor })
    }
}

/// Whether `provider` yields credentials right now. A configured provider
/// chain that finds nothing does not count.
pub async fn credentials_available(provider: Option<SharedCredentialsProvider>) -> bool {
    let Some(provider) = provider else {
        return false;
    };

    match provider.provide_credentials().await {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to resolve S3 credentials: {}", e);
            false
        }
    }
}

#[async_trait]
impl RemoteClient for S3RemoteClient {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn is_authorized(&self) -> bool {
        self.authorized
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_folder(&self, path: &str) -> SyncResult<FolderPage> {
        let page = self.list_page(path, None).await?;
        debug!("Listed {} objects under {}", page.entries.len(), path);
        Ok(page)
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_folder_continue(&self, cursor: &FolderCursor) -> SyncResult<FolderPage> {
        self.list_page(&cursor.folder, Some(cursor.token.clone()))
            .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_metadata(&self, path: &str) -> SyncResult<RemoteMetadata> {
        let key = Self::object_key(path);
        if key.is_empty() {
            return Err(SyncError::Remote(format!("Invalid object path '{}'", path)));
        }

        let result = self
            .s3_client
            .head_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let revision = Self::revision(output.e_tag)
                    .ok_or_else(|| SyncError::Remote(format!("No ETag for {}", path)))?;
                Ok(RemoteMetadata { revision })
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Err(SyncError::Remote(format!("Object not found: {}", path)))
                } else {
                    Err(SyncError::Remote(format!(
                        "S3 head_object error: {}",
                        service_error
                    )))
                }
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn download(&self, path: &str) -> SyncResult<Vec<u8>> {
        let key = Self::object_key(path);

        let output = self
            .s3_client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    SyncError::Remote(format!("Object not found: {}", path))
                } else {
                    SyncError::Remote(format!("S3 get_object error: {}", service_error))
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| SyncError::Remote(format!("Failed to read S3 object body: {}", e)))?
            .into_bytes();

        debug!("Downloaded {} ({} bytes)", path, bytes.len());
        Ok(bytes.to_vec())
    }
}
