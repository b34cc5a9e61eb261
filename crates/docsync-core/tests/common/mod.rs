//! In-memory remote store and fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docsync_core::{
    CatalogItem, EngineConfig, FolderCursor, FolderPage, LocalStore, RemoteClient, RemoteEntry,
    RemoteMetadata, SyncEngine, SyncError, SyncResult,
};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

/// Catalog used throughout the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    Genres,
    Languages,
}

impl CatalogItem for Content {
    const GROUP: &'static str = "content";
    const FOLDER_PATH: &'static str = "/JSONs";

    fn all() -> &'static [Self] {
        &[Content::Genres, Content::Languages]
    }

    fn file_name(&self) -> &'static str {
        match self {
            Content::Genres => "genres.json",
            Content::Languages => "languages.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Genre {
    pub id: u32,
    pub name: String,
}

/// Holds downloads of one path until released.
pub struct DownloadGate {
    entered: Notify,
    open: Semaphore,
}

impl DownloadGate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            open: Semaphore::new(0),
        }
    }

    /// Wait until a download has reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let every current and future download through.
    pub fn release(&self) {
        self.open.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        let _permit = self.open.acquire().await;
    }
}

#[derive(Debug, Clone)]
struct RemoteFile {
    revision: String,
    content: Vec<u8>,
}

/// Scriptable remote store. Paths are canonicalized to lowercase.
pub struct FakeRemote {
    authorized: AtomicBool,
    page_size: usize,
    files: Mutex<BTreeMap<String, RemoteFile>>,
    failing_paths: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    gates: Mutex<HashMap<String, Arc<DownloadGate>>>,
    pub list_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            authorized: AtomicBool::new(true),
            page_size: page_size.max(1),
            files: Mutex::new(BTreeMap::new()),
            failing_paths: Mutex::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            gates: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn canonical(path: &str) -> String {
        path.to_lowercase()
    }

    /// Create or replace a remote file.
    pub fn put(&self, path: &str, revision: &str, content: &str) {
        self.files.lock().unwrap().insert(
            Self::canonical(path),
            RemoteFile {
                revision: revision.to_string(),
                content: content.as_bytes().to_vec(),
            },
        );
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make metadata and downloads of `path` fail.
    pub fn fail_path(&self, path: &str) {
        self.failing_paths
            .lock()
            .unwrap()
            .insert(Self::canonical(path));
    }

    /// Block downloads of `path` until the returned gate is released.
    pub fn gate_download(&self, path: &str) -> Arc<DownloadGate> {
        let gate = Arc::new(DownloadGate::new());
        self.gates
            .lock()
            .unwrap()
            .insert(Self::canonical(path), gate.clone());
        gate
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn remote_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
            + self.metadata_calls.load(Ordering::SeqCst)
            + self.download_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, path: &str) -> SyncResult<RemoteFile> {
        let path = Self::canonical(path);
        if self.failing_paths.lock().unwrap().contains(&path) {
            return Err(SyncError::Remote(format!("injected failure for {}", path)));
        }
        self.files
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .ok_or_else(|| SyncError::Remote(format!("path not found: '{}'", path)))
    }

    fn page(&self, folder: &str, offset: usize) -> SyncResult<FolderPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SyncError::Remote("injected listing failure".to_string()));
        }

        let prefix = format!("{}/", Self::canonical(folder).trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let all: Vec<RemoteEntry> = files
            .iter()
            .filter_map(|(path, file)| {
                let name = path.strip_prefix(&prefix)?;
                Some(RemoteEntry {
                    name: name.to_string(),
                    canonical_path: path.clone(),
                    revision: file.revision.clone(),
                })
            })
            .collect();

        let end = (offset + self.page_size).min(all.len());
        let cursor = (end < all.len()).then(|| FolderCursor {
            folder: folder.to_string(),
            token: end.to_string(),
        });

        Ok(FolderPage {
            entries: all[offset.min(end)..end].to_vec(),
            cursor,
        })
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn list_folder(&self, path: &str) -> SyncResult<FolderPage> {
        self.page(path, 0)
    }

    async fn list_folder_continue(&self, cursor: &FolderCursor) -> SyncResult<FolderPage> {
        let offset = cursor
            .token
            .parse()
            .map_err(|_| SyncError::Remote(format!("bad cursor {}", cursor.token)))?;
        self.page(&cursor.folder, offset)
    }

    async fn get_metadata(&self, path: &str) -> SyncResult<RemoteMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let file = self.lookup(path)?;
        Ok(RemoteMetadata {
            revision: file.revision,
        })
    }

    async fn download(&self, path: &str) -> SyncResult<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .gates
            .lock()
            .unwrap()
            .get(&Self::canonical(path))
            .cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(self.lookup(path)?.content)
    }
}

/// Engine wired to a fake remote and a temporary cache root.
pub struct Harness {
    pub engine: SyncEngine,
    pub remote: Arc<FakeRemote>,
    pub temp_dir: TempDir,
}

impl Harness {
    pub fn new(remote: FakeRemote) -> Self {
        Self::with_config(remote, EngineConfig::default())
    }

    pub fn with_config(remote: FakeRemote, config: EngineConfig) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let remote = Arc::new(remote);
        let store = LocalStore::new(temp_dir.path(), "JSONs");
        let engine = SyncEngine::new(store, Some(remote.clone() as Arc<dyn RemoteClient>), config);
        Self {
            engine,
            remote,
            temp_dir,
        }
    }

    /// Place a file directly in the local cache directory.
    pub fn seed_local(&self, file_name: &str, content: &str) {
        let dir = self.temp_dir.path().join("JSONs");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file_name), content).unwrap();
    }
}
