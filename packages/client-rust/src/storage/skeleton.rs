//! ID-only relational graph of the catalog, with version and checksum.
//!
//! The skeleton holds which artists, albums, and tracks exist and how they
//! relate -- no per-entity attributes. It is mutated only by server events:
//! a full-snapshot replace or an ordered delta. Both are atomic from an
//! observer's perspective: one KV batch, then one in-memory commit under the
//! write lock, then feed notifications.
//!
//! Removals drop relation rows outright. A surviving edge may point at a
//! removed parent (a tombstone); observers simply see the edge until the
//! server removes it too.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chorus_core::checksum::SkeletonDigest;
use chorus_core::messages::catalog::{SkeletonAlbum, SkeletonChange, SkeletonTrack};
use parking_lot::RwLock;
use tracing::warn;

use super::kv::{self, keys, KeyValueStore, StoreError, WriteOp};
use crate::feed::{FeedRegistry, FeedSubscriber};

#[derive(Debug, Default, Clone)]
struct Graph {
    version: u64,
    checksum: String,
    artists: BTreeSet<String>,
    /// album id -> contributing artist ids
    albums: BTreeMap<String, Vec<String>>,
    /// track id -> parent album id
    tracks: BTreeMap<String, String>,
    /// Derived: artist id -> album ids, in application order.
    albums_by_artist: BTreeMap<String, Vec<String>>,
    /// Derived: album id -> track ids, in application order.
    tracks_by_album: BTreeMap<String, Vec<String>>,
}

impl Graph {
    fn add_album(&mut self, id: &str, artist_ids: Vec<String>) {
        self.remove_album(id);
        for artist_id in &artist_ids {
            let list = self.albums_by_artist.entry(artist_id.clone()).or_default();
            if !list.iter().any(|a| a == id) {
                list.push(id.to_string());
            }
        }
        self.albums.insert(id.to_string(), artist_ids);
    }

    fn remove_album(&mut self, id: &str) {
        if let Some(artist_ids) = self.albums.remove(id) {
            for artist_id in artist_ids {
                if let Some(list) = self.albums_by_artist.get_mut(&artist_id) {
                    list.retain(|a| a != id);
                }
            }
        }
    }

    fn add_track(&mut self, id: &str, album_id: String) {
        self.remove_track(id);
        let list = self.tracks_by_album.entry(album_id.clone()).or_default();
        if !list.iter().any(|t| t == id) {
            list.push(id.to_string());
        }
        self.tracks.insert(id.to_string(), album_id);
    }

    fn remove_track(&mut self, id: &str) {
        if let Some(album_id) = self.tracks.remove(id) {
            if let Some(list) = self.tracks_by_album.get_mut(&album_id) {
                list.retain(|t| t != id);
            }
        }
    }

    fn digest(&self) -> String {
        let mut digest = SkeletonDigest::new();
        for artist_id in &self.artists {
            digest.artist(artist_id);
        }
        for (album_id, artist_ids) in &self.albums {
            digest.album(album_id, artist_ids);
        }
        for (track_id, album_id) in &self.tracks {
            digest.track(track_id, album_id);
        }
        digest.finish()
    }
}

/// Holds the skeleton graph and its sync metadata.
pub struct SkeletonStore {
    kv: Arc<dyn KeyValueStore>,
    graph: RwLock<Graph>,
    artist_feeds: FeedRegistry<String, Vec<String>>,
    album_feeds: FeedRegistry<String, Vec<String>>,
}

impl SkeletonStore {
    /// Opens the store, rebuilding the in-memory graph from persisted rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails; corrupt rows are
    /// skipped with a warning.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        let graph = Self::load(kv.as_ref())?;
        Ok(Self {
            kv,
            graph: RwLock::new(graph),
            artist_feeds: FeedRegistry::new(),
            album_feeds: FeedRegistry::new(),
        })
    }

    fn load(kv: &dyn KeyValueStore) -> Result<Graph, StoreError> {
        let mut graph = Graph::default();
        if let Some(bytes) = kv.get(keys::SKELETON_VERSION)? {
            graph.version = kv::decode(&bytes)?;
        }
        if let Some(bytes) = kv.get(keys::SKELETON_CHECKSUM)? {
            graph.checksum = kv::decode(&bytes)?;
        }
        for (key, _) in kv.scan_prefix(keys::SKELETON_ARTIST_PREFIX)? {
            let id = key.trim_start_matches(keys::SKELETON_ARTIST_PREFIX);
            graph.artists.insert(id.to_string());
        }
        for (key, bytes) in kv.scan_prefix(keys::SKELETON_ALBUM_PREFIX)? {
            let id = key.trim_start_matches(keys::SKELETON_ALBUM_PREFIX).to_string();
            match kv::decode::<Vec<String>>(&bytes) {
                Ok(artist_ids) => graph.add_album(&id, artist_ids),
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt skeleton album row"),
            }
        }
        for (key, bytes) in kv.scan_prefix(keys::SKELETON_TRACK_PREFIX)? {
            let id = key.trim_start_matches(keys::SKELETON_TRACK_PREFIX).to_string();
            match kv::decode::<String>(&bytes) {
                Ok(album_id) => graph.add_track(&id, album_id),
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt skeleton track row"),
            }
        }
        Ok(graph)
    }

    /// Current replicated version (0 = never synced).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.graph.read().version
    }

    /// Server-declared checksum of the current version.
    #[must_use]
    pub fn checksum(&self) -> String {
        self.graph.read().checksum.clone()
    }

    /// Recomputes the canonical checksum over the local graph.
    #[must_use]
    pub fn computed_checksum(&self) -> String {
        self.graph.read().digest()
    }

    /// Whether the next sync must fetch the full skeleton.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn needs_full_resync(&self) -> Result<bool, StoreError> {
        match self.kv.get(keys::NEEDS_SKELETON_FULL_SYNC)? {
            Some(bytes) => Ok(kv::decode(&bytes)?),
            None => Ok(false),
        }
    }

    /// Sets or clears the full-resync flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn set_needs_full_resync(&self, value: bool) -> Result<(), StoreError> {
        if value {
            self.kv
                .put(keys::NEEDS_SKELETON_FULL_SYNC, kv::encode(&true)?)
        } else {
            self.kv.delete(keys::NEEDS_SKELETON_FULL_SYNC)
        }
    }

    /// Atomically replaces the whole graph (full resync path).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleVersion`] when `version` is older than the
    /// current one, or [`StoreError`] if persisting fails.
    pub fn replace_all(
        &self,
        artists: &[String],
        albums: &[SkeletonAlbum],
        tracks: &[SkeletonTrack],
        version: u64,
        checksum: &str,
    ) -> Result<(), StoreError> {
        let mut graph = self.graph.write();
        if version < graph.version {
            return Err(StoreError::StaleVersion {
                requested: version,
                current: graph.version,
            });
        }

        let mut next = Graph {
            version,
            checksum: checksum.to_string(),
            ..Graph::default()
        };
        for artist_id in artists {
            next.artists.insert(artist_id.clone());
        }
        for album in albums {
            next.add_album(&album.id, album.artist_ids.clone());
        }
        for track in tracks {
            next.add_track(&track.id, track.album_id.clone());
        }

        let mut ops = Vec::new();
        for prefix in [
            keys::SKELETON_ARTIST_PREFIX,
            keys::SKELETON_ALBUM_PREFIX,
            keys::SKELETON_TRACK_PREFIX,
        ] {
            for (key, _) in self.kv.scan_prefix(prefix)? {
                ops.push(WriteOp::delete(key));
            }
        }
        Self::append_graph_ops(&next, &mut ops)?;
        self.kv.write_batch(ops)?;

        *graph = next;
        let snapshot = graph.clone();
        drop(graph);
        self.notify_all(&snapshot);
        Ok(())
    }

    /// Atomically applies an ordered delta, advancing to `to_version`.
    ///
    /// Unknown change kinds are skipped with a warning. Re-applying the same
    /// delta (same `to_version`) is a no-op in effect: every change is
    /// idempotent and the version does not move.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleVersion`] when `to_version` is older than
    /// the current version, or [`StoreError`] if persisting fails.
    pub fn apply_delta(
        &self,
        changes: &[SkeletonChange],
        to_version: u64,
        checksum: &str,
    ) -> Result<(), StoreError> {
        let mut graph = self.graph.write();
        if to_version < graph.version {
            return Err(StoreError::StaleVersion {
                requested: to_version,
                current: graph.version,
            });
        }

        let mut next = graph.clone();
        let mut touched_artists: BTreeSet<String> = BTreeSet::new();
        let mut touched_albums: BTreeSet<String> = BTreeSet::new();
        for change in changes {
            match change {
                SkeletonChange::ArtistAdded { id } => {
                    next.artists.insert(id.clone());
                }
                SkeletonChange::ArtistRemoved { id } => {
                    next.artists.remove(id);
                }
                SkeletonChange::AlbumAdded { id, artist_ids } => {
                    touched_artists.extend(artist_ids.iter().cloned());
                    next.add_album(id, artist_ids.clone());
                }
                SkeletonChange::AlbumRemoved { id } => {
                    if let Some(artist_ids) = next.albums.get(id) {
                        touched_artists.extend(artist_ids.iter().cloned());
                    }
                    next.remove_album(id);
                }
                SkeletonChange::TrackAdded { id, album_id } => {
                    touched_albums.insert(album_id.clone());
                    next.add_track(id, album_id.clone());
                }
                SkeletonChange::TrackRemoved { id } => {
                    if let Some(album_id) = next.tracks.get(id) {
                        touched_albums.insert(album_id.clone());
                    }
                    next.remove_track(id);
                }
                SkeletonChange::Unknown => {
                    warn!(to_version, "skipping unknown skeleton change kind");
                }
            }
        }
        next.version = to_version;
        next.checksum = checksum.to_string();

        let mut ops = vec![
            WriteOp::put(keys::SKELETON_VERSION, kv::encode(&to_version)?),
            WriteOp::put(keys::SKELETON_CHECKSUM, kv::encode(&checksum.to_string())?),
        ];
        Self::append_delta_ops(&next, changes, &mut ops)?;
        self.kv.write_batch(ops)?;

        *graph = next;
        let snapshot = graph.clone();
        drop(graph);

        for artist_id in &touched_artists {
            self.artist_feeds.update(
                artist_id,
                snapshot
                    .albums_by_artist
                    .get(artist_id)
                    .cloned()
                    .unwrap_or_default(),
            );
        }
        for album_id in &touched_albums {
            self.album_feeds.update(
                album_id,
                snapshot
                    .tracks_by_album
                    .get(album_id)
                    .cloned()
                    .unwrap_or_default(),
            );
        }
        Ok(())
    }

    /// Live sequence of album IDs attributed to `artist_id`.
    pub fn observe_album_ids_for_artist(&self, artist_id: &str) -> FeedSubscriber<Vec<String>> {
        self.artist_feeds.subscribe_with(artist_id.to_string(), || {
            self.graph
                .read()
                .albums_by_artist
                .get(artist_id)
                .cloned()
                .unwrap_or_default()
        })
    }

    /// Live sequence of track IDs belonging to `album_id`.
    pub fn observe_track_ids_for_album(&self, album_id: &str) -> FeedSubscriber<Vec<String>> {
        self.album_feeds.subscribe_with(album_id.to_string(), || {
            self.graph
                .read()
                .tracks_by_album
                .get(album_id)
                .cloned()
                .unwrap_or_default()
        })
    }

    fn notify_all(&self, graph: &Graph) {
        self.artist_feeds.refresh_all(|artist_id| {
            graph
                .albums_by_artist
                .get(artist_id)
                .cloned()
                .unwrap_or_default()
        });
        self.album_feeds.refresh_all(|album_id| {
            graph
                .tracks_by_album
                .get(album_id)
                .cloned()
                .unwrap_or_default()
        });
    }

    fn append_graph_ops(graph: &Graph, ops: &mut Vec<WriteOp>) -> Result<(), StoreError> {
        ops.push(WriteOp::put(
            keys::SKELETON_VERSION,
            kv::encode(&graph.version)?,
        ));
        ops.push(WriteOp::put(
            keys::SKELETON_CHECKSUM,
            kv::encode(&graph.checksum)?,
        ));
        for artist_id in &graph.artists {
            ops.push(WriteOp::put(
                format!("{}{artist_id}", keys::SKELETON_ARTIST_PREFIX),
                kv::encode(&true)?,
            ));
        }
        for (album_id, artist_ids) in &graph.albums {
            ops.push(WriteOp::put(
                format!("{}{album_id}", keys::SKELETON_ALBUM_PREFIX),
                kv::encode(artist_ids)?,
            ));
        }
        for (track_id, album_id) in &graph.tracks {
            ops.push(WriteOp::put(
                format!("{}{track_id}", keys::SKELETON_TRACK_PREFIX),
                kv::encode(album_id)?,
            ));
        }
        Ok(())
    }

    /// Row-level ops for the keys a delta touched: rows present in the new
    /// graph are rewritten, vanished rows are deleted.
    fn append_delta_ops(
        new: &Graph,
        changes: &[SkeletonChange],
        ops: &mut Vec<WriteOp>,
    ) -> Result<(), StoreError> {
        let mut artist_ids: BTreeSet<&str> = BTreeSet::new();
        let mut album_ids: BTreeSet<&str> = BTreeSet::new();
        let mut track_ids: BTreeSet<&str> = BTreeSet::new();
        for change in changes {
            match change {
                SkeletonChange::ArtistAdded { id } | SkeletonChange::ArtistRemoved { id } => {
                    artist_ids.insert(id);
                }
                SkeletonChange::AlbumAdded { id, .. } | SkeletonChange::AlbumRemoved { id } => {
                    album_ids.insert(id);
                }
                SkeletonChange::TrackAdded { id, .. } | SkeletonChange::TrackRemoved { id } => {
                    track_ids.insert(id);
                }
                SkeletonChange::Unknown => {}
            }
        }
        for id in artist_ids {
            let key = format!("{}{id}", keys::SKELETON_ARTIST_PREFIX);
            if new.artists.contains(id) {
                ops.push(WriteOp::put(key, kv::encode(&true)?));
            } else {
                ops.push(WriteOp::delete(key));
            }
        }
        for id in album_ids {
            let key = format!("{}{id}", keys::SKELETON_ALBUM_PREFIX);
            if let Some(artist_ids) = new.albums.get(id) {
                ops.push(WriteOp::put(key, kv::encode(artist_ids)?));
            } else {
                ops.push(WriteOp::delete(key));
            }
        }
        for id in track_ids {
            let key = format!("{}{id}", keys::SKELETON_TRACK_PREFIX);
            if let Some(album_id) = new.tracks.get(id) {
                ops.push(WriteOp::put(key, kv::encode(album_id)?));
            } else {
                ops.push(WriteOp::delete(key));
            }
        }
        Ok(())
    }

}
