use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::catalog::ItemId;

/// What the engine knows about one cached catalog item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub item: ItemId,
    /// Canonical remote path; empty until a remote pass confirms it
    pub remote_path: String,
    pub local_path: PathBuf,
    /// Last known revision tag; empty when unknown
    pub revision: String,
    /// When the local file was last written from the remote
    pub synced_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Entry populated from a file already present on disk.
    pub fn local(item: ItemId, local_path: PathBuf) -> Self {
        Self {
            item,
            remote_path: String::new(),
            local_path,
            revision: String::new(),
            synced_at: None,
        }
    }

    /// Entry confirmed by the remote store.
    pub fn synced(
        item: ItemId,
        remote_path: impl Into<String>,
        local_path: PathBuf,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            item,
            remote_path: remote_path.into(),
            local_path,
            revision: revision.into(),
            synced_at: Some(Utc::now()),
        }
    }

    /// Whether a remote pass has confirmed this entry's path.
    pub fn is_confirmed(&self) -> bool {
        !self.remote_path.is_empty()
    }
}

/// In-memory map from file name to cache entry.
///
/// Entries are replaced whole, so readers always see a consistent
/// `local_path`/`revision` pair. Writers of the same key serialize through
/// [`CacheIndex::lock_entry`]; readers never touch those locks.
#[derive(Debug, Default)]
pub struct CacheIndex {
    entries: DashMap<String, CacheEntry>,
    update_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<CacheEntry> {
        self.entries.get(file_name).map(|e| e.clone())
    }

    /// Insert or replace an entry keyed by its item's file name.
    pub fn upsert(&self, entry: CacheEntry) {
        self.entries
            .insert(entry.item.file_name().to_string(), entry);
    }

    /// Insert or replace several entries.
    pub fn upsert_all(&self, entries: impl IntoIterator<Item = CacheEntry>) {
        for entry in entries {
            self.upsert(entry);
        }
    }

    /// Replace the local path and revision of an existing entry in one step.
    /// Returns false if the entry does not exist.
    pub fn update_revision(&self, file_name: &str, local_path: PathBuf, revision: String) -> bool {
        match self.entries.get_mut(file_name) {
            Some(mut entry) => {
                let updated = CacheEntry {
                    item: entry.item.clone(),
                    remote_path: entry.remote_path.clone(),
                    local_path,
                    revision,
                    synced_at: Some(Utc::now()),
                };
                *entry = updated;
                true
            }
            None => false,
        }
    }

    /// Acquire the update lock for one key.
    pub async fn lock_entry(&self, file_name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .update_locks
            .entry(file_name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.item.cmp(&b.item));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
