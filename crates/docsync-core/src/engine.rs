use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogDescriptor, ItemId};
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::index::{CacheEntry, CacheIndex};
use crate::notify::ChangeNotifier;
use crate::poll::{PollLoop, PollReport, PollState};
use crate::remote::RemoteClient;
use crate::store::LocalStore;

/// State shared between the engine handle and its background tasks.
pub(crate) struct Shared {
    pub(crate) store: LocalStore,
    pub(crate) remote: Option<Arc<dyn RemoteClient>>,
    pub(crate) index: CacheIndex,
    pub(crate) notifier: ChangeNotifier,
    pub(crate) config: EngineConfig,
    pub(crate) poller: PollLoop,
    /// Serializes remote passes; staged files are named per item
    remote_pass: AsyncMutex<()>,
}

/// A downloaded file waiting for the whole remote pass to succeed.
struct StagedFile {
    entry: CacheEntry,
    staged_path: PathBuf,
    /// Index revision before the download started
    baseline: Option<String>,
}

impl Shared {
    pub(crate) fn authorized_remote(&self) -> Option<Arc<dyn RemoteClient>> {
        self.remote
            .as_ref()
            .filter(|remote| remote.is_authorized())
            .cloned()
    }

    /// Download every catalog file listed remotely into staged siblings.
    /// Nothing visible changes until [`Shared::commit_staged`].
    async fn stage_catalog(
        &self,
        remote: &dyn RemoteClient,
        catalog: &dyn CatalogDescriptor,
        staged: &mut Vec<StagedFile>,
    ) -> SyncResult<()> {
        let listed = remote.list_folder_all(catalog.folder_path()).await?;

        let by_name: HashMap<String, ItemId> = catalog
            .items()
            .into_iter()
            .map(|item| (item.file_name().to_string(), item))
            .collect();

        for entry in listed {
            let Some(item) = by_name.get(&entry.name) else {
                debug!("Ignoring remote file {} outside the catalog", entry.canonical_path);
                continue;
            };

            let baseline = self.index.get(&entry.name).map(|e| e.revision);
            let data = remote.download(&entry.canonical_path).await?;
            let local_path = self.store.resolve_local_path(&entry.name)?;
            let staged_path = self.store.stage(&local_path, &data).await?;

            debug!(
                "Downloaded {} at revision {} ({} bytes)",
                entry.canonical_path,
                entry.revision,
                data.len()
            );
            staged.push(StagedFile {
                entry: CacheEntry::synced(
                    item.clone(),
                    entry.canonical_path,
                    local_path,
                    entry.revision,
                ),
                staged_path,
                baseline,
            });
        }

        Ok(())
    }

    /// Move staged files into place and index them, one key lock at a time.
    /// An entry a poll tick advanced after staging began keeps the newer
    /// content. Returns the number of committed entries.
    async fn commit_staged(&self, staged: Vec<StagedFile>) -> SyncResult<usize> {
        let mut committed = 0;
        let mut pending = staged.into_iter();

        while let Some(file) = pending.next() {
            let file_name = file.entry.item.file_name().to_string();
            let guard = self.index.lock_entry(&file_name).await;

            let current = self.index.get(&file_name).map(|e| e.revision);
            let advanced = current != file.baseline
                && current.as_deref().is_some_and(|revision| !revision.is_empty());
            if advanced {
                debug!(
                    "Keeping {} at revision {}, updated during the remote pass",
                    file.entry.item,
                    current.unwrap_or_default()
                );
                self.store.discard_staged(&file.staged_path).await;
                continue;
            }

            if let Err(e) = self
                .store
                .commit_staged(&file.staged_path, &file.entry.local_path)
                .await
            {
                drop(guard);
                self.discard_all(pending).await;
                return Err(e);
            }
            self.index.upsert(file.entry);
            committed += 1;
        }

        Ok(committed)
    }

    async fn discard_all(&self, staged: impl IntoIterator<Item = StagedFile>) {
        for file in staged {
            self.store.discard_staged(&file.staged_path).await;
        }
    }
}

/// Cache-and-sync engine for remote JSON documents.
///
/// Content is loaded local-first with [`SyncEngine::load_local_files`], then
/// refreshed best-effort with [`SyncEngine::prepare_content`]. Once a remote
/// pass has succeeded and the connectivity signal reports the network as
/// reachable, a background loop polls revisions and publishes the identity
/// of every updated item.
///
/// Reads are synchronous and never touch the network.
pub struct SyncEngine {
    shared: Arc<Shared>,
    connectivity_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("cache_dir", &self.shared.store.cache_dir())
            .field("entries", &self.shared.index.len())
            .field("prepared", &self.is_prepared())
            .field("poll_state", &self.poll_state())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create a new engine. `remote` is `None` when no remote client is
    /// configured; the engine then serves local content only.
    ///
    /// Background work runs on the Tokio runtime current here, or on the
    /// one driving the first [`SyncEngine::prepare_content`].
    pub fn new(
        store: LocalStore,
        remote: Option<Arc<dyn RemoteClient>>,
        config: EngineConfig,
    ) -> Self {
        let notifier = ChangeNotifier::new(config.channel_capacity);
        Self {
            shared: Arc::new(Shared {
                store,
                remote,
                index: CacheIndex::new(),
                notifier,
                config,
                poller: PollLoop::new(),
                remote_pass: AsyncMutex::new(()),
            }),
            connectivity_task: Mutex::new(None),
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Index the catalog's files already present on disk.
    ///
    /// All-or-nothing: returns `Ok(false)` and leaves the index untouched if
    /// any item has no local file. Fails only when the private storage root
    /// is unusable.
    #[instrument(skip(self, catalog), level = "debug", fields(folder = catalog.folder_path()))]
    pub fn load_local_files(&self, catalog: &dyn CatalogDescriptor) -> SyncResult<bool> {
        let mut staged = Vec::new();

        for item in catalog.items() {
            let local_path = self.shared.store.resolve_local_path(item.file_name())?;
            if !self.shared.store.exists(&local_path) {
                debug!("No local copy of {}, local load aborted", item);
                return Ok(false);
            }
            staged.push(CacheEntry::local(item, local_path));
        }

        debug!("Loaded {} local files", staged.len());
        self.shared.index.upsert_all(staged);
        Ok(true)
    }

    /// Mirror the catalog from the remote store.
    ///
    /// Never fails observably: without an authorized remote client it
    /// returns immediately, and any remote or disk failure is logged while
    /// the index and the files on disk keep their previous content.
    /// Concurrent calls run one after another.
    #[instrument(skip(self, catalog), level = "debug", fields(folder = catalog.folder_path()))]
    pub async fn prepare_content(&self, catalog: &dyn CatalogDescriptor) {
        let Some(remote) = self.shared.authorized_remote() else {
            debug!("No authorized remote client, serving local content only");
            return;
        };

        self.shared.poller.bind_current_runtime();
        let _pass = self.shared.remote_pass.lock().await;

        let mut staged = Vec::new();
        let outcome = match self
            .shared
            .stage_catalog(remote.as_ref(), catalog, &mut staged)
            .await
        {
            Ok(()) => self.shared.commit_staged(staged).await,
            Err(e) => {
                self.shared.discard_all(staged).await;
                Err(e)
            }
        };

        match outcome {
            Ok(count) => {
                info!(
                    "Synced {} files from {} ({})",
                    count,
                    catalog.folder_path(),
                    remote.backend_name()
                );
                self.shared.poller.mark_prepared(&self.shared);
            }
            Err(e) => {
                warn!(
                    "Remote sync of {} failed, keeping local content: {}",
                    catalog.folder_path(),
                    e
                );
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Look up the cache entry of an item without touching the file.
    pub fn get(&self, item: &ItemId) -> SyncResult<CacheEntry> {
        self.shared
            .index
            .get(item.file_name())
            .ok_or_else(|| SyncError::NotCached(item.to_string()))
    }

    /// Raw bytes of an item's local file.
    pub fn get_raw(&self, item: &ItemId) -> SyncResult<Vec<u8>> {
        let entry = self.get(item)?;
        self.shared.store.read(&entry.local_path)
    }

    /// Decode an item's local file into `T`.
    pub fn get_decoded<T: DeserializeOwned>(&self, item: &ItemId) -> SyncResult<T> {
        let data = self.get_raw(item)?;
        serde_json::from_slice(&data).map_err(|e| SyncError::Decode(format!("{}: {}", item, e)))
    }

    /// Parse an item's local file as a JSON object.
    pub fn get_structured(&self, item: &ItemId) -> SyncResult<Map<String, Value>> {
        match self.get_decoded::<Value>(item)? {
            Value::Object(map) => Ok(map),
            other => Err(SyncError::NotAnObject(format!(
                "{} holds {}",
                item,
                json_kind(&other)
            ))),
        }
    }

    /// Snapshot of every cache entry.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.shared.index.snapshot()
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Receive the identity of every item updated by the poll loop from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ItemId> {
        self.shared.notifier.subscribe()
    }

    /// Same as [`SyncEngine::subscribe`], as a `Stream`.
    pub fn changes(&self) -> impl Stream<Item = ItemId> + Send + 'static {
        self.shared.notifier.stream()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drive the poll loop from a connectivity signal, replacing any
    /// previously attached signal. Must be called within a Tokio runtime.
    pub fn attach_connectivity(&self, mut signal: watch::Receiver<bool>) {
        let shared = self.shared.clone();
        let initial = *signal.borrow_and_update();
        shared.poller.set_connected(&shared, initial);

        let task = tokio::spawn(async move {
            while signal.changed().await.is_ok() {
                let online = *signal.borrow_and_update();
                shared.poller.set_connected(&shared, online);
            }
            debug!("Connectivity signal closed");
        });

        if let Some(previous) = self.lock_connectivity_task().replace(task) {
            previous.abort();
        }
    }

    /// Feed a single connectivity value without a signal. Callable from
    /// any thread.
    pub fn set_connectivity(&self, online: bool) {
        self.shared.poller.set_connected(&self.shared, online);
    }

    /// Run one poll tick now and wait for every entry to finish.
    pub async fn poll_once(&self) -> PollReport {
        self.shared.poll_once().await
    }

    /// Release the connectivity subscription and stop the poll loop.
    /// In-flight per-entry work is allowed to finish.
    pub fn shutdown(&self) {
        if let Some(task) = self.lock_connectivity_task().take() {
            task.abort();
        }
        if self.shared.poller.close() {
            info!("Poll loop stopped on shutdown");
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.shared.poller.is_prepared()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.poller.is_connected()
    }

    pub fn poll_state(&self) -> PollState {
        self.shared.poller.state()
    }

    fn lock_connectivity_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.connectivity_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
