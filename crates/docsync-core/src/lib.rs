//! Local cache-and-sync layer for remote JSON documents.
//!
//! This crate keeps a fixed catalog of named remote documents mirrored on
//! local disk:
//! - `LocalStore`: flat, atomically written cache directory
//! - `RemoteClient`: paginated listing, revision metadata and downloads
//! - `CacheIndex`: file name to cache entry, updated atomically per entry
//! - `SyncEngine`: local-first load, best-effort remote pass, read accessors
//! - `PollLoop`: connectivity-gated revision polling
//! - `ChangeNotifier`: broadcast of updated item identities

mod catalog;
mod config;
mod engine;
mod error;
mod index;
mod notify;
mod poll;
mod remote;
mod store;

pub use catalog::{CatalogDescriptor, CatalogItem, ItemId, StaticCatalog, TypedCatalog};
pub use config::{
    EngineConfig, DEFAULT_CACHE_DIR_NAME, DEFAULT_CHANNEL_CAPACITY, DEFAULT_POLL_INTERVAL,
};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use index::{CacheEntry, CacheIndex};
pub use notify::ChangeNotifier;
pub use poll::{PollReport, PollState};
pub use remote::{FolderCursor, FolderPage, RemoteClient, RemoteEntry, RemoteMetadata};
pub use store::LocalStore;
