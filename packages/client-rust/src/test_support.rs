//! Shared test doubles: a pinnable clock and a scripted transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chorus_core::clock::ClockSource;
use chorus_core::messages::catalog::{SkeletonDelta, SkeletonSnapshot, SkeletonVersion};
use chorus_core::messages::user_sync::{EventBatch, UserStateSnapshot};
use chorus_core::types::{Album, Artist, ArtistKind, Availability, Track};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::transport::{CatalogTransport, TransportError, UserMutation};

/// Clock pinned to a settable millisecond value.
#[derive(Debug)]
pub struct FixedClock {
    now_ms: AtomicU64,
}

impl FixedClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl ClockSource for FixedClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Polls `cond` until it holds, panicking after a generous number of turns.
/// Meant for `start_paused` tests where timers auto-advance.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}

/// Scriptable in-memory [`CatalogTransport`].
///
/// Items, snapshots, deltas, and event batches are registered up front;
/// failures can be injected per item or per endpoint. Call counts are
/// recorded for assertions.
#[derive(Default)]
pub struct ScriptedTransport {
    artists: DashMap<String, Artist>,
    albums: DashMap<String, Album>,
    tracks: DashMap<String, Track>,
    item_failures: DashMap<String, TransportError>,
    fetch_counts: DashMap<String, u64>,

    skeleton: Mutex<Option<SkeletonSnapshot>>,
    deltas: Mutex<HashMap<u64, Result<SkeletonDelta, TransportError>>>,
    skeleton_failure: Mutex<Option<TransportError>>,
    skeleton_calls: AtomicU64,
    delta_calls: AtomicU64,

    user_state: Mutex<Option<UserStateSnapshot>>,
    user_events: Mutex<HashMap<u64, Result<EventBatch, TransportError>>>,
    user_state_failure: Mutex<Option<TransportError>>,
    user_state_calls: AtomicU64,

    mutations: Mutex<Vec<UserMutation>>,
    mutation_failure: Mutex<Option<TransportError>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // --- scripting: items ---

    pub fn put_artist(&self, id: &str, kind: ArtistKind) {
        self.artists.insert(
            id.to_string(),
            Artist {
                id: id.to_string(),
                display_name: format!("Artist {id}"),
                image_id: None,
                kind,
                members_ids: None,
            },
        );
    }

    pub fn put_album(&self, id: &str, artist_ids: &[&str]) {
        self.albums.insert(
            id.to_string(),
            Album {
                id: id.to_string(),
                name: format!("Album {id}"),
                release_date: "2020-01-01".to_string(),
                image_id: None,
                artist_ids: artist_ids.iter().map(ToString::to_string).collect(),
                discs: Vec::new(),
            },
        );
    }

    pub fn put_track(&self, id: &str, album_id: &str) {
        self.tracks.insert(
            id.to_string(),
            Track {
                id: id.to_string(),
                name: format!("Track {id}"),
                album_id: album_id.to_string(),
                artist_ids: Vec::new(),
                duration_seconds: 180,
                availability: Availability::Available,
            },
        );
    }

    pub fn fail_item(&self, id: &str, error: TransportError) {
        self.item_failures.insert(id.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.item_failures.clear();
        *self.skeleton_failure.lock() = None;
        *self.user_state_failure.lock() = None;
        *self.mutation_failure.lock() = None;
    }

    pub fn fetch_count(&self, id: &str) -> u64 {
        self.fetch_counts.get(id).map_or(0, |c| *c)
    }

    // --- scripting: skeleton ---

    pub fn set_skeleton(&self, snapshot: SkeletonSnapshot) {
        *self.skeleton.lock() = Some(snapshot);
    }

    pub fn set_delta(&self, since: u64, result: Result<SkeletonDelta, TransportError>) {
        self.deltas.lock().insert(since, result);
    }

    pub fn fail_skeleton(&self, error: TransportError) {
        *self.skeleton_failure.lock() = Some(error);
    }

    pub fn skeleton_calls(&self) -> u64 {
        self.skeleton_calls.load(Ordering::SeqCst)
    }

    pub fn delta_calls(&self) -> u64 {
        self.delta_calls.load(Ordering::SeqCst)
    }

    // --- scripting: user data ---

    pub fn set_user_state(&self, snapshot: UserStateSnapshot) {
        *self.user_state.lock() = Some(snapshot);
    }

    pub fn set_user_events(&self, since: u64, result: Result<EventBatch, TransportError>) {
        self.user_events.lock().insert(since, result);
    }

    pub fn fail_user_state(&self, error: TransportError) {
        *self.user_state_failure.lock() = Some(error);
    }

    pub fn user_state_calls(&self) -> u64 {
        self.user_state_calls.load(Ordering::SeqCst)
    }

    pub fn fail_mutations(&self, error: TransportError) {
        *self.mutation_failure.lock() = Some(error);
    }

    pub fn sent_mutations(&self) -> Vec<UserMutation> {
        self.mutations.lock().clone()
    }

    fn record_fetch(&self, id: &str) {
        *self.fetch_counts.entry(id.to_string()).or_insert(0) += 1;
    }

    fn item_failure(&self, id: &str) -> Option<TransportError> {
        self.item_failures.get(id).map(|e| e.clone())
    }
}

#[async_trait]
impl CatalogTransport for ScriptedTransport {
    async fn fetch_artist(&self, id: &str) -> Result<Artist, TransportError> {
        self.record_fetch(id);
        if let Some(error) = self.item_failure(id) {
            return Err(error);
        }
        self.artists
            .get(id)
            .map(|a| a.clone())
            .ok_or(TransportError::NotFound)
    }

    async fn fetch_album(&self, id: &str) -> Result<Album, TransportError> {
        self.record_fetch(id);
        if let Some(error) = self.item_failure(id) {
            return Err(error);
        }
        self.albums
            .get(id)
            .map(|a| a.clone())
            .ok_or(TransportError::NotFound)
    }

    async fn fetch_track(&self, id: &str) -> Result<Track, TransportError> {
        self.record_fetch(id);
        if let Some(error) = self.item_failure(id) {
            return Err(error);
        }
        self.tracks
            .get(id)
            .map(|t| t.clone())
            .ok_or(TransportError::NotFound)
    }

    async fn fetch_skeleton(&self) -> Result<SkeletonSnapshot, TransportError> {
        self.skeleton_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.skeleton_failure.lock().clone() {
            return Err(error);
        }
        self.skeleton
            .lock()
            .clone()
            .ok_or_else(|| TransportError::Network("no skeleton scripted".to_string()))
    }

    async fn fetch_skeleton_version(&self) -> Result<SkeletonVersion, TransportError> {
        if let Some(error) = self.skeleton_failure.lock().clone() {
            return Err(error);
        }
        self.skeleton
            .lock()
            .as_ref()
            .map(|s| SkeletonVersion {
                version: s.version,
                checksum: s.checksum.clone(),
            })
            .ok_or_else(|| TransportError::Network("no skeleton scripted".to_string()))
    }

    async fn fetch_skeleton_delta(&self, since: u64) -> Result<SkeletonDelta, TransportError> {
        self.delta_calls.fetch_add(1, Ordering::SeqCst);
        self.deltas
            .lock()
            .get(&since)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::Network(format!("no delta scripted for {since}"))))
    }

    async fn fetch_user_state(&self) -> Result<UserStateSnapshot, TransportError> {
        self.user_state_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.user_state_failure.lock().clone() {
            return Err(error);
        }
        self.user_state
            .lock()
            .clone()
            .ok_or_else(|| TransportError::Network("no user state scripted".to_string()))
    }

    async fn fetch_user_events(&self, since: u64) -> Result<EventBatch, TransportError> {
        self.user_events.lock().get(&since).cloned().unwrap_or_else(|| {
            Ok(EventBatch {
                events: Vec::new(),
                current_seq: since,
            })
        })
    }

    async fn send_user_mutation(&self, mutation: &UserMutation) -> Result<(), TransportError> {
        if let Some(error) = self.mutation_failure.lock().clone() {
            return Err(error);
        }
        self.mutations.lock().push(mutation.clone());
        Ok(())
    }
}
