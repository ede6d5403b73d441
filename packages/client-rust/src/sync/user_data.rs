//! User-data event engine: cursor-based log replication with optimistic
//! local writes.
//!
//! `initialize()` chooses between a full state sync and a catch-up from the
//! cursor. Events apply in `seq` order; anything at or below the cursor is
//! skipped, a gap triggers a catch-up (or full sync), and `events_pruned`
//! flags a full resync. Optimistic mutations mark the affected playlist
//! `pending_*` and send the REST call; the server's echo event is the
//! commit signal that clears the marker.

use std::sync::Arc;

use chorus_core::clock::ClockSource;
use chorus_core::messages::user_sync::{StoredEvent, UserEvent};
use chorus_core::types::ItemKind;
use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{RetrySchedule, SyncError, SyncPhase};
use crate::config::RetryConfig;
use crate::feed::{Feed, FeedSubscriber};
use crate::storage::user_data::{Playlist, PlaylistSyncStatus, UserDataStore};
use crate::transport::{CatalogTransport, TransportError, UserMutation};

/// Protocol driver for the user-data log.
pub struct UserDataEngine {
    store: Arc<UserDataStore>,
    transport: Arc<dyn CatalogTransport>,
    clock: Arc<dyn ClockSource>,
    phase: Feed<SyncPhase>,
    run_lock: tokio::sync::Mutex<()>,
    retry: Mutex<RetrySchedule>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
}

impl UserDataEngine {
    #[must_use]
    pub fn new(
        store: Arc<UserDataStore>,
        transport: Arc<dyn CatalogTransport>,
        clock: Arc<dyn ClockSource>,
        retry_config: RetryConfig,
        stop: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            clock,
            phase: Feed::new(SyncPhase::Idle),
            run_lock: tokio::sync::Mutex::new(()),
            retry: Mutex::new(RetrySchedule::new(retry_config)),
            retry_task: Mutex::new(None),
            stop,
        })
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.phase.get()
    }

    /// Subscribes to phase transitions (current phase replayed first).
    #[must_use]
    pub fn observe_phase(&self) -> FeedSubscriber<SyncPhase> {
        self.phase.subscribe()
    }

    /// Access to the underlying store for reads.
    #[must_use]
    pub fn store(&self) -> &Arc<UserDataStore> {
        &self.store
    }

    // --- reconciliation drivers ---

    /// Entry point: full sync when the cursor is 0 or a resync is flagged,
    /// catch-up otherwise. Never fails upward.
    pub async fn initialize(self: &Arc<Self>) {
        let _guard = self.run_lock.lock().await;
        self.phase.publish_if_changed(SyncPhase::Syncing);
        let needs_full = self.store.cursor() == 0
            || self.store.needs_full_resync().unwrap_or(true);
        let result = if needs_full {
            self.full_sync_inner().await
        } else {
            self.catch_up_inner().await
        };
        self.settle(result);
    }

    /// Forces a full state sync.
    pub async fn full_sync(self: &Arc<Self>) {
        let _guard = self.run_lock.lock().await;
        self.phase.publish_if_changed(SyncPhase::Syncing);
        let result = self.full_sync_inner().await;
        self.settle(result);
    }

    /// Fetches and applies events past the cursor.
    pub async fn catch_up(self: &Arc<Self>) {
        let _guard = self.run_lock.lock().await;
        self.phase.publish_if_changed(SyncPhase::Syncing);
        let result = self.catch_up_inner().await;
        self.settle(result);
    }

    /// Handles one pushed event: applies it in order, or catches up when a
    /// gap is detected.
    pub async fn handle_event(self: &Arc<Self>, event: StoredEvent) {
        let _guard = self.run_lock.lock().await;
        let cursor = self.store.cursor();
        if event.seq <= cursor {
            debug!(seq = event.seq, cursor, "ignoring already-applied event");
            return;
        }
        if event.seq > cursor + 1 {
            info!(seq = event.seq, cursor, "event gap; catching up");
            let result = self.catch_up_inner().await;
            self.settle(result);
            return;
        }
        if let Err(error) = self.apply_stored(&event) {
            warn!(seq = event.seq, error = %error, "failed to apply pushed event");
            self.phase.publish(SyncPhase::Error {
                reason: error.to_string(),
            });
            self.schedule_retry();
        }
    }

    async fn full_sync_inner(&self) -> Result<u64, SyncError> {
        let snapshot = self.transport.fetch_user_state().await?;
        self.store.replace_authoritative(&snapshot)?;
        counter!("chorus_user_full_sync_total").increment(1);
        self.flush_pending_reads().await;
        Ok(self.store.cursor())
    }

    async fn catch_up_inner(&self) -> Result<u64, SyncError> {
        let cursor = self.store.cursor();
        let batch = match self.transport.fetch_user_events(cursor).await {
            Ok(batch) => batch,
            Err(TransportError::EventsPruned) => {
                info!(cursor, "event log pruned; full resync");
                self.store.set_needs_full_resync(true)?;
                return self.full_sync_inner().await;
            }
            Err(error) => return Err(error.into()),
        };

        if let Some(first) = batch.events.first() {
            if first.seq > cursor + 1 {
                info!(
                    cursor,
                    first_seq = first.seq,
                    "gap in event batch; full resync"
                );
                return self.full_sync_inner().await;
            }
        }
        for event in &batch.events {
            self.apply_stored(event)?;
        }
        self.flush_pending_reads().await;
        Ok(self.store.cursor())
    }

    fn settle(self: &Arc<Self>, result: Result<u64, SyncError>) {
        match result {
            Ok(seq) => {
                self.retry.lock().reset();
                self.phase.publish(SyncPhase::Synced { version: seq });
            }
            Err(error) => {
                counter!("chorus_user_sync_failure_total").increment(1);
                warn!(error = %error, "user-data sync failed");
                self.phase.publish(SyncPhase::Error {
                    reason: error.to_string(),
                });
                self.schedule_retry();
            }
        }
    }

    // --- event application ---

    /// Applies one stored event and advances the cursor. Events at or below
    /// the cursor are skipped, which makes re-delivery harmless.
    fn apply_stored(&self, event: &StoredEvent) -> Result<(), SyncError> {
        if event.seq <= self.store.cursor() {
            return Ok(());
        }
        self.apply_event(&event.event)?;
        self.store.set_cursor(event.seq)?;
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn apply_event(&self, event: &UserEvent) -> Result<(), SyncError> {
        match event {
            UserEvent::ContentLiked { kind, id } => {
                self.store.set_liked(*kind, id, true)?;
            }
            UserEvent::ContentUnliked { kind, id } => {
                self.store.set_liked(*kind, id, false)?;
            }
            UserEvent::SettingChanged { key, value } => {
                self.store.upsert_setting(key, value.clone())?;
            }
            UserEvent::PlaylistCreated { id, name } => match self.store.playlist(id) {
                Some(mut local) if local.sync_status == PlaylistSyncStatus::PendingCreate => {
                    local.sync_status = PlaylistSyncStatus::Synced;
                    self.store.upsert_playlist(local)?;
                }
                Some(_) => {}
                None => {
                    self.store.upsert_playlist(Playlist {
                        id: id.clone(),
                        name: name.clone(),
                        track_ids: Vec::new(),
                        sync_status: PlaylistSyncStatus::Synced,
                    })?;
                }
            },
            UserEvent::PlaylistRenamed { id, name } => match self.store.playlist(id) {
                None => warn!(id = %id, "rename echo for unknown playlist"),
                Some(mut local) => match local.sync_status {
                    PlaylistSyncStatus::Synced => {
                        local.name = name.clone();
                        self.store.upsert_playlist(local)?;
                    }
                    PlaylistSyncStatus::PendingUpdate | PlaylistSyncStatus::PendingCreate => {
                        // The echo matching our local value is the commit
                        // signal; a different name means a newer local write
                        // is still unconfirmed.
                        if local.name == *name {
                            local.sync_status = PlaylistSyncStatus::Synced;
                            self.store.upsert_playlist(local)?;
                        }
                    }
                    PlaylistSyncStatus::PendingDelete => {}
                },
            },
            UserEvent::PlaylistDeleted { id } => {
                self.store.delete_playlist(id)?;
            }
            UserEvent::PlaylistTracksUpdated { id, track_ids } => {
                match self.store.playlist(id) {
                    None => warn!(id = %id, "tracks echo for unknown playlist"),
                    Some(mut local) => match local.sync_status {
                        PlaylistSyncStatus::Synced => {
                            local.track_ids = track_ids.clone();
                            self.store.upsert_playlist(local)?;
                        }
                        PlaylistSyncStatus::PendingUpdate
                        | PlaylistSyncStatus::PendingCreate => {
                            if local.track_ids == *track_ids {
                                local.sync_status = PlaylistSyncStatus::Synced;
                                self.store.upsert_playlist(local)?;
                            }
                        }
                        PlaylistSyncStatus::PendingDelete => {}
                    },
                }
            }
            UserEvent::PermissionGranted { permission } => {
                self.store.grant_permission(permission)?;
            }
            UserEvent::PermissionRevoked { permission } => {
                self.store.revoke_permission(permission)?;
            }
            UserEvent::PermissionReset { permissions } => {
                self.store.reset_permissions(permissions)?;
            }
            UserEvent::NotificationCreated { notification } => {
                self.store.prepend_notification(notification.clone())?;
            }
            UserEvent::NotificationRead { id, read_at_ms } => {
                self.store.mark_notification_read(id, *read_at_ms)?;
            }
            UserEvent::Unknown => {
                warn!("skipping unknown user event kind");
            }
        }
        Ok(())
    }

    // --- optimistic local writes ---

    /// Sets or clears a like locally, then tells the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the REST call fails; the local write stays
    /// and the echo (or next sync) reconciles it.
    pub async fn set_liked(
        &self,
        kind: ItemKind,
        id: &str,
        liked: bool,
    ) -> Result<(), SyncError> {
        self.store.set_liked(kind, id, liked)?;
        self.transport
            .send_user_mutation(&UserMutation::SetLiked {
                kind,
                id: id.to_string(),
                liked,
            })
            .await?;
        Ok(())
    }

    /// Upserts a setting locally, then tells the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the REST call fails.
    pub async fn set_setting(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), SyncError> {
        self.store.upsert_setting(key, value.clone())?;
        self.transport
            .send_user_mutation(&UserMutation::SetSetting {
                key: key.to_string(),
                value,
            })
            .await?;
        Ok(())
    }

    /// Creates a playlist with a locally generated ID, pending until the
    /// server echoes the creation. Returns the new ID.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if persisting or the REST call fails.
    pub async fn create_playlist(&self, name: &str) -> Result<String, SyncError> {
        let id = Uuid::new_v4().to_string();
        self.store.upsert_playlist(Playlist {
            id: id.clone(),
            name: name.to_string(),
            track_ids: Vec::new(),
            sync_status: PlaylistSyncStatus::PendingCreate,
        })?;
        self.transport
            .send_user_mutation(&UserMutation::CreatePlaylist {
                id: id.clone(),
                name: name.to_string(),
            })
            .await?;
        Ok(id)
    }

    /// Renames a playlist optimistically.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownPlaylist`] for an unknown ID, or
    /// [`SyncError`] if persisting or the REST call fails.
    pub async fn rename_playlist(&self, id: &str, name: &str) -> Result<(), SyncError> {
        let mut playlist = self
            .store
            .playlist(id)
            .ok_or_else(|| SyncError::UnknownPlaylist(id.to_string()))?;
        playlist.name = name.to_string();
        if playlist.sync_status == PlaylistSyncStatus::Synced {
            playlist.sync_status = PlaylistSyncStatus::PendingUpdate;
        }
        self.store.upsert_playlist(playlist)?;
        self.transport
            .send_user_mutation(&UserMutation::RenamePlaylist {
                id: id.to_string(),
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Replaces a playlist's tracks optimistically.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownPlaylist`] for an unknown ID, or
    /// [`SyncError`] if persisting or the REST call fails.
    pub async fn set_playlist_tracks(
        &self,
        id: &str,
        track_ids: Vec<String>,
    ) -> Result<(), SyncError> {
        let mut playlist = self
            .store
            .playlist(id)
            .ok_or_else(|| SyncError::UnknownPlaylist(id.to_string()))?;
        playlist.track_ids = track_ids.clone();
        if playlist.sync_status == PlaylistSyncStatus::Synced {
            playlist.sync_status = PlaylistSyncStatus::PendingUpdate;
        }
        self.store.upsert_playlist(playlist)?;
        self.transport
            .send_user_mutation(&UserMutation::SetPlaylistTracks {
                id: id.to_string(),
                track_ids,
            })
            .await?;
        Ok(())
    }

    /// Deletes a playlist optimistically. A playlist the server never saw
    /// (`pending_create`) is dropped outright; anything else is kept with a
    /// `pending_delete` marker until the echo confirms.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if persisting or the REST call fails.
    pub async fn delete_playlist(&self, id: &str) -> Result<(), SyncError> {
        if let Some(mut playlist) = self.store.playlist(id) {
            if playlist.sync_status == PlaylistSyncStatus::PendingCreate {
                self.store.delete_playlist(id)?;
            } else {
                playlist.sync_status = PlaylistSyncStatus::PendingDelete;
                self.store.upsert_playlist(playlist)?;
            }
        }
        self.transport
            .send_user_mutation(&UserMutation::DeletePlaylist { id: id.to_string() })
            .await?;
        Ok(())
    }

    /// Marks a notification read locally. If the server cannot be reached
    /// the read is queued and flushed after the next successful sync.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] only if the local write fails; transport
    /// failures are absorbed into the offline queue.
    pub async fn mark_notification_read(&self, id: &str) -> Result<(), SyncError> {
        self.store
            .mark_notification_read(id, self.clock.now_ms())?;
        let mutation = UserMutation::MarkNotificationRead { id: id.to_string() };
        if let Err(error) = self.transport.send_user_mutation(&mutation).await {
            debug!(id, error = %error, "queueing offline notification read");
            self.store.queue_pending_read(id)?;
        }
        Ok(())
    }

    /// Flushes queued offline notification reads. Unsent IDs are re-queued.
    async fn flush_pending_reads(&self) {
        let pending = match self.store.take_pending_reads() {
            Ok(pending) => pending,
            Err(error) => {
                warn!(error = %error, "failed to drain pending reads");
                return;
            }
        };
        for (index, id) in pending.iter().enumerate() {
            let mutation = UserMutation::MarkNotificationRead { id: id.clone() };
            if let Err(error) = self.transport.send_user_mutation(&mutation).await {
                warn!(id = %id, error = %error, "pending read flush interrupted");
                for unsent in &pending[index..] {
                    if let Err(e) = self.store.queue_pending_read(unsent) {
                        warn!(id = %unsent, error = %e, "failed to re-queue pending read");
                    }
                }
                return;
            }
        }
    }

    // --- lifecycle ---

    fn schedule_retry(self: &Arc<Self>) {
        let delay = self.retry.lock().next_delay();
        let this = Arc::clone(self);
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => this.initialize().await,
                () = stop.cancelled() => {}
            }
        });
        if let Some(previous) = self.retry_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancels any scheduled retry, resets in-memory state, and clears the
    /// persisted cursor (the next initialization runs a full sync).
    pub fn cleanup(&self) {
        if let Some(handle) = self.retry_task.lock().take() {
            handle.abort();
        }
        self.retry.lock().reset();
        if let Err(error) = self.store.reset_cursor() {
            warn!(error = %error, "failed to clear persisted cursor");
        }
        self.phase.publish(SyncPhase::Idle);
    }
}
