use thiserror::Error;

/// Result alias used across the crate.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the cache and sync layer.
///
/// Only the accessor family (`NotCached`, `NotFound`, `Io`, `Decode`,
/// `NotAnObject`) ever reaches callers of the engine. Remote failures are
/// logged and swallowed by `prepare_content` and the poll loop.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Not cached: {0}")]
    NotCached(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not a JSON object: {0}")]
    NotAnObject(String),

    #[error("Remote client is not authorized")]
    Unauthorized,

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}
