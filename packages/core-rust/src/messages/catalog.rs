//! Catalog skeleton wire messages.
//!
//! The skeleton is the ID-only relational graph (artists, albums, tracks)
//! replicated through a version-cursor delta protocol with a full-snapshot
//! fallback. These types mirror the JSON bodies of the
//! `/catalog/skeleton*` endpoints.

use serde::{Deserialize, Serialize};

/// Album row in the skeleton graph: the album ID and its contributing artists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonAlbum {
    pub id: String,
    pub artist_ids: Vec<String>,
}

/// Track row in the skeleton graph: the track ID and its parent album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonTrack {
    pub id: String,
    pub album_id: String,
}

/// Full skeleton snapshot, returned by `GET /catalog/skeleton`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonSnapshot {
    pub version: u64,
    pub checksum: String,
    pub artists: Vec<String>,
    pub albums: Vec<SkeletonAlbum>,
    pub tracks: Vec<SkeletonTrack>,
}

/// Version probe response from `GET /catalog/skeleton/version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonVersion {
    pub version: u64,
    pub checksum: String,
}

/// One change entry in a skeleton delta.
///
/// The `Unknown` catch-all absorbs change kinds introduced by newer servers;
/// consumers skip them with a warning instead of failing the whole delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkeletonChange {
    ArtistAdded { id: String },
    ArtistRemoved { id: String },
    AlbumAdded { id: String, artist_ids: Vec<String> },
    AlbumRemoved { id: String },
    TrackAdded { id: String, album_id: String },
    TrackRemoved { id: String },
    #[serde(other)]
    Unknown,
}

/// Delta response from `GET /catalog/skeleton/delta?since=N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonDelta {
    pub from_version: u64,
    pub to_version: u64,
    pub checksum: String,
    pub changes: Vec<SkeletonChange>,
}

/// Structured 404 body when the requested delta base has been pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTooOldBody {
    pub error: String,
    pub earliest_available: u64,
    pub current_version: u64,
}
