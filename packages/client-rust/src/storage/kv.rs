//! Key-value persistence boundary.
//!
//! The innermost storage layer: a flat, string-keyed byte store with prefix
//! scans and atomic multi-op batches. Everything the client persists
//! (entities, fetch records, skeleton rows, user data, sync cursors) lives
//! behind this trait, so swapping the durable backend never touches the
//! stores above it.
//!
//! Wrapped in `Arc<dyn KeyValueStore>` for sharing across async boundaries.
//! All operations are synchronous and expected to be fast; implementations
//! must make `write_batch` atomic with respect to readers and crashes.

use thiserror::Error;

/// Error from the persistence layer or the payload codec.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed (I/O, corruption, transaction failure).
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A persisted payload failed to encode or decode.
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// A versioned write was older than the current state.
    #[error("stale version {requested} (current {current})")]
    StaleVersion { requested: u64, current: u64 },
}

/// One operation in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WriteOp {
    /// Shorthand for a `Put` with an owned key.
    #[must_use]
    pub fn put(key: impl Into<String>, value: Vec<u8>) -> Self {
        WriteOp::Put {
            key: key.into(),
            value,
        }
    }

    /// Shorthand for a `Delete` with an owned key.
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        WriteOp::Delete { key: key.into() }
    }
}

/// Flat byte store with prefix scans and atomic batches.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Retrieve the value for `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backing store fails.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backing store fails.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove `key` if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backing store fails.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the backing store fails.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Apply all `ops` atomically: either every op is visible or none is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the batch cannot be committed.
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}

/// Persisted key constants and table prefixes.
///
/// Meta keys are the small fixed set the sync engines depend on; table
/// prefixes namespace the per-row tables.
pub mod keys {
    pub const SKELETON_VERSION: &str = "skeleton_version";
    pub const SKELETON_CHECKSUM: &str = "skeleton_checksum";
    pub const USER_CURSOR: &str = "user_cursor";
    pub const NEEDS_USER_FULL_SYNC: &str = "needs_user_full_sync";
    pub const NEEDS_SKELETON_FULL_SYNC: &str = "needs_skeleton_full_sync";

    pub const ENTITY_PREFIX: &str = "entity/";
    pub const FETCH_STATE_PREFIX: &str = "fetch_state/";
    pub const SKELETON_ARTIST_PREFIX: &str = "skeleton/artist/";
    pub const SKELETON_ALBUM_PREFIX: &str = "skeleton/album/";
    pub const SKELETON_TRACK_PREFIX: &str = "skeleton/track/";
    pub const USER_LIKE_PREFIX: &str = "user/like/";
    pub const USER_PLAYLIST_PREFIX: &str = "user/playlist/";
    pub const USER_SETTING_PREFIX: &str = "user/setting/";
    pub const USER_PERMISSION_PREFIX: &str = "user/permission/";
    pub const USER_NOTIFICATIONS: &str = "user/notifications";
    pub const USER_PENDING_READS: &str = "user/pending_reads";
}

/// Encodes a value as its persisted JSON payload.
///
/// # Errors
///
/// Returns [`StoreError::Codec`] if serialization fails.
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a persisted JSON payload.
///
/// # Errors
///
/// Returns [`StoreError::Codec`] if the payload does not parse.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}
