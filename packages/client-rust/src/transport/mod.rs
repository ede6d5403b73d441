//! Transport boundary: the REST surface the client core depends on.
//!
//! Everything that touches the network sits behind [`CatalogTransport`] so
//! the fetcher and the synchronizers can be exercised against a scripted
//! implementation. The real implementation is [`http::HttpTransport`].

pub mod http;

use async_trait::async_trait;
use chorus_core::messages::catalog::{SkeletonDelta, SkeletonSnapshot, SkeletonVersion};
use chorus_core::messages::user_sync::{EventBatch, UserStateSnapshot};
use chorus_core::types::{Album, Artist, ItemKind, Track};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failure, classified per the client error taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Transient reachability problem (DNS, connect, timeout, 5xx).
    #[error("network error: {0}")]
    Network(String),
    /// Credentials missing or rejected (401/403).
    #[error("unauthorized")]
    Unauthorized,
    /// The resource does not exist (404).
    #[error("not found")]
    NotFound,
    /// The requested delta base predates the server's retained history.
    #[error("version too old: earliest available {earliest_available}, current {current_version}")]
    VersionTooOld {
        earliest_available: u64,
        current_version: u64,
    },
    /// The requested event range has been pruned (410).
    #[error("events pruned")]
    EventsPruned,
    /// The response body did not parse as the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Any other status.
    #[error("unexpected status {status}")]
    Unexpected { status: u16 },
}

impl TransportError {
    /// Whether retrying later could plausibly succeed without intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_) | TransportError::Unexpected { .. }
        )
    }
}

/// An optimistic user mutation, sent as a REST call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserMutation {
    SetLiked {
        kind: ItemKind,
        id: String,
        liked: bool,
    },
    SetSetting {
        key: String,
        value: serde_json::Value,
    },
    CreatePlaylist {
        id: String,
        name: String,
    },
    RenamePlaylist {
        id: String,
        name: String,
    },
    DeletePlaylist {
        id: String,
    },
    SetPlaylistTracks {
        id: String,
        track_ids: Vec<String>,
    },
    MarkNotificationRead {
        id: String,
    },
}

/// Client-to-server REST surface.
///
/// Used as `Arc<dyn CatalogTransport>`.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    /// `GET /v1/content/artist/{id}`
    async fn fetch_artist(&self, id: &str) -> Result<Artist, TransportError>;

    /// `GET /v1/content/album/{id}`
    async fn fetch_album(&self, id: &str) -> Result<Album, TransportError>;

    /// `GET /v1/content/track/{id}`
    async fn fetch_track(&self, id: &str) -> Result<Track, TransportError>;

    /// `GET /v1/catalog/skeleton`
    async fn fetch_skeleton(&self) -> Result<SkeletonSnapshot, TransportError>;

    /// `GET /v1/catalog/skeleton/version`
    async fn fetch_skeleton_version(&self) -> Result<SkeletonVersion, TransportError>;

    /// `GET /v1/catalog/skeleton/delta?since=N`
    async fn fetch_skeleton_delta(&self, since: u64) -> Result<SkeletonDelta, TransportError>;

    /// `GET /v1/sync/state`
    async fn fetch_user_state(&self) -> Result<UserStateSnapshot, TransportError>;

    /// `GET /v1/sync/events?since=N`
    async fn fetch_user_events(&self, since: u64) -> Result<EventBatch, TransportError>;

    /// `POST /v1/user/...` -- dispatched by mutation kind.
    async fn send_user_mutation(&self, mutation: &UserMutation) -> Result<(), TransportError>;
}
