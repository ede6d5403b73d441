//! Replicated per-user state: likes, playlists, permissions, settings,
//! notifications, and the event-log cursor.
//!
//! Playlists carry a local-only `sync_status`: optimistic mutations mark
//! them pending, and the matching server echo event clears the marker.
//! Everything else is last-writer-wins against the event log.
//!
//! Notification reads attempted while offline land in a durable queue and
//! are flushed after the next successful sync.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chorus_core::messages::user_sync::{LikeRef, NotificationSnapshot, UserStateSnapshot};
use chorus_core::types::ItemKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::kv::{self, keys, KeyValueStore, StoreError, WriteOp};
use crate::feed::{Feed, FeedSubscriber};

/// Maximum notifications retained; the oldest are dropped beyond this.
pub const NOTIFICATION_CAP: usize = 100;

/// Local reconciliation state of a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistSyncStatus {
    /// Matches the server's view.
    Synced,
    /// Created locally; the server has not echoed it yet.
    PendingCreate,
    /// Renamed or re-tracked locally; awaiting the echo.
    PendingUpdate,
    /// Deleted locally; kept until the echo confirms.
    PendingDelete,
}

/// A playlist as the client materializes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub track_ids: Vec<String>,
    pub sync_status: PlaylistSyncStatus,
}

impl Playlist {
    /// Whether this playlist has a local mutation the server has not
    /// confirmed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sync_status != PlaylistSyncStatus::Synced
    }
}

/// Which slice of user data a change notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDataArea {
    All,
    Cursor,
    Likes,
    Playlists,
    Permissions,
    Settings,
    Notifications,
}

/// One change-feed tick: a monotone revision plus the area that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDataRevision {
    pub revision: u64,
    pub area: UserDataArea,
}

#[derive(Debug, Default)]
struct UserState {
    cursor: u64,
    likes: BTreeSet<LikeRef>,
    playlists: BTreeMap<String, Playlist>,
    permissions: BTreeSet<String>,
    settings: BTreeMap<String, serde_json::Value>,
    /// Newest first.
    notifications: Vec<NotificationSnapshot>,
    pending_reads: Vec<String>,
    revision: u64,
}

fn like_key(like: &LikeRef) -> String {
    format!("{}{}:{}", keys::USER_LIKE_PREFIX, like.kind.as_str(), like.id)
}

/// Durable store of the user's replicated state plus a change feed.
pub struct UserDataStore {
    kv: Arc<dyn KeyValueStore>,
    state: RwLock<UserState>,
    changes: Feed<UserDataRevision>,
}

impl UserDataStore {
    /// Opens the store, rebuilding in-memory state from persisted rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails; corrupt rows are
    /// skipped with a warning.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        let mut state = UserState::default();
        if let Some(bytes) = kv.get(keys::USER_CURSOR)? {
            state.cursor = kv::decode(&bytes)?;
        }
        for (key, bytes) in kv.scan_prefix(keys::USER_LIKE_PREFIX)? {
            match kv::decode::<LikeRef>(&bytes) {
                Ok(like) => {
                    state.likes.insert(like);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt like row"),
            }
        }
        for (key, bytes) in kv.scan_prefix(keys::USER_PLAYLIST_PREFIX)? {
            match kv::decode::<Playlist>(&bytes) {
                Ok(playlist) => {
                    state.playlists.insert(playlist.id.clone(), playlist);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt playlist row"),
            }
        }
        for (key, bytes) in kv.scan_prefix(keys::USER_PERMISSION_PREFIX)? {
            match kv::decode::<String>(&bytes) {
                Ok(permission) => {
                    state.permissions.insert(permission);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt permission row"),
            }
        }
        for (key, bytes) in kv.scan_prefix(keys::USER_SETTING_PREFIX)? {
            let setting_key = key
                .trim_start_matches(keys::USER_SETTING_PREFIX)
                .to_string();
            match kv::decode::<serde_json::Value>(&bytes) {
                Ok(value) => {
                    state.settings.insert(setting_key, value);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt setting row"),
            }
        }
        if let Some(bytes) = kv.get(keys::USER_NOTIFICATIONS)? {
            state.notifications = kv::decode(&bytes)?;
        }
        if let Some(bytes) = kv.get(keys::USER_PENDING_READS)? {
            state.pending_reads = kv::decode(&bytes)?;
        }

        Ok(Self {
            kv,
            state: RwLock::new(state),
            changes: Feed::new(UserDataRevision {
                revision: 0,
                area: UserDataArea::All,
            }),
        })
    }

    /// Subscribes to change notifications. The first value replays
    /// `UserDataArea::All`, so new subscribers refresh everything once.
    #[must_use]
    pub fn changes(&self) -> FeedSubscriber<UserDataRevision> {
        self.changes.subscribe()
    }

    fn bump(&self, state: &mut UserState, area: UserDataArea) {
        state.revision += 1;
        self.changes.publish(UserDataRevision {
            revision: state.revision,
            area,
        });
    }

    // --- cursor & resync flag ---

    /// Highest applied event sequence number (0 = never synced).
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.state.read().cursor
    }

    /// Advances the cursor. Values at or below the current cursor are
    /// ignored: the cursor never decreases.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn set_cursor(&self, seq: u64) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if seq <= state.cursor {
            debug!(seq, cursor = state.cursor, "ignoring non-advancing cursor");
            return Ok(());
        }
        self.kv.put(keys::USER_CURSOR, kv::encode(&seq)?)?;
        state.cursor = seq;
        self.bump(&mut state, UserDataArea::Cursor);
        Ok(())
    }

    /// Resets the cursor to 0 (used by `cleanup`; forces a full resync on
    /// the next initialization).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn reset_cursor(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        self.kv.delete(keys::USER_CURSOR)?;
        state.cursor = 0;
        self.bump(&mut state, UserDataArea::Cursor);
        Ok(())
    }

    /// Whether the next sync must fetch the full user state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn needs_full_resync(&self) -> Result<bool, StoreError> {
        match self.kv.get(keys::NEEDS_USER_FULL_SYNC)? {
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
            self.kv.put(keys::NEEDS_USER_FULL_SYNC, kv::encode(&true)?)
        } else {
            self.kv.delete(keys::NEEDS_USER_FULL_SYNC)
        }
    }

    // --- likes ---

    #[must_use]
    pub fn is_liked(&self, kind: ItemKind, id: &str) -> bool {
        self.state.read().likes.contains(&LikeRef {
            kind,
            id: id.to_string(),
        })
    }

    #[must_use]
    pub fn likes(&self) -> Vec<LikeRef> {
        self.state.read().likes.iter().cloned().collect()
    }

    /// Sets or clears the liked flag for `(kind, id)`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn set_liked(&self, kind: ItemKind, id: &str, liked: bool) -> Result<(), StoreError> {
        let like = LikeRef {
            kind,
            id: id.to_string(),
        };
        let mut state = self.state.write();
        if state.likes.contains(&like) == liked {
            return Ok(());
        }
        if liked {
            self.kv.put(&like_key(&like), kv::encode(&like)?)?;
            state.likes.insert(like);
        } else {
            self.kv.delete(&like_key(&like))?;
            state.likes.remove(&like);
        }
        self.bump(&mut state, UserDataArea::Likes);
        Ok(())
    }

    // --- settings ---

    #[must_use]
    pub fn setting(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().settings.get(key).cloned()
    }

    #[must_use]
    pub fn settings(&self) -> BTreeMap<String, serde_json::Value> {
        self.state.read().settings.clone()
    }

    /// Inserts or replaces a setting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn upsert_setting(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut state = self.state.write();
        self.kv.put(
            &format!("{}{key}", keys::USER_SETTING_PREFIX),
            kv::encode(&value)?,
        )?;
        state.settings.insert(key.to_string(), value);
        self.bump(&mut state, UserDataArea::Settings);
        Ok(())
    }

    // --- permissions ---

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.state.read().permissions.contains(permission)
    }

    #[must_use]
    pub fn permissions(&self) -> BTreeSet<String> {
        self.state.read().permissions.clone()
    }

    /// Adds a permission to the set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn grant_permission(&self, permission: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.permissions.contains(permission) {
            return Ok(());
        }
        self.kv.put(
            &format!("{}{permission}", keys::USER_PERMISSION_PREFIX),
            kv::encode(&permission.to_string())?,
        )?;
        state.permissions.insert(permission.to_string());
        self.bump(&mut state, UserDataArea::Permissions);
        Ok(())
    }

    /// Removes a permission from the set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn revoke_permission(&self, permission: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.permissions.contains(permission) {
            return Ok(());
        }
        self.kv
            .delete(&format!("{}{permission}", keys::USER_PERMISSION_PREFIX))?;
        state.permissions.remove(permission);
        self.bump(&mut state, UserDataArea::Permissions);
        Ok(())
    }

    /// Replaces the whole permission set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn reset_permissions(&self, permissions: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let mut ops = Vec::new();
        for old in &state.permissions {
            ops.push(WriteOp::delete(format!(
                "{}{old}",
                keys::USER_PERMISSION_PREFIX
            )));
        }
        for permission in permissions {
            ops.push(WriteOp::put(
                format!("{}{permission}", keys::USER_PERMISSION_PREFIX),
                kv::encode(permission)?,
            ));
        }
        self.kv.write_batch(ops)?;
        state.permissions = permissions.iter().cloned().collect();
        self.bump(&mut state, UserDataArea::Permissions);
        Ok(())
    }

    // --- playlists ---

    #[must_use]
    pub fn playlist(&self, id: &str) -> Option<Playlist> {
        self.state.read().playlists.get(id).cloned()
    }

    #[must_use]
    pub fn playlists(&self) -> Vec<Playlist> {
        self.state.read().playlists.values().cloned().collect()
    }

    /// Inserts or replaces a playlist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn upsert_playlist(&self, playlist: Playlist) -> Result<(), StoreError> {
        let mut state = self.state.write();
        self.kv.put(
            &format!("{}{}", keys::USER_PLAYLIST_PREFIX, playlist.id),
            kv::encode(&playlist)?,
        )?;
        state.playlists.insert(playlist.id.clone(), playlist);
        self.bump(&mut state, UserDataArea::Playlists);
        Ok(())
    }

    /// Deletes a playlist outright.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn delete_playlist(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.playlists.contains_key(id) {
            return Ok(());
        }
        self.kv
            .delete(&format!("{}{id}", keys::USER_PLAYLIST_PREFIX))?;
        state.playlists.remove(id);
        self.bump(&mut state, UserDataArea::Playlists);
        Ok(())
    }

    // --- notifications ---

    #[must_use]
    pub fn notifications(&self) -> Vec<NotificationSnapshot> {
        self.state.read().notifications.clone()
    }

    /// Prepends a notification, dropping the oldest beyond the cap.
    /// A notification with an already-known ID is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn prepend_notification(
        &self,
        notification: NotificationSnapshot,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.notifications.iter().any(|n| n.id == notification.id) {
            return Ok(());
        }
        let mut next = state.notifications.clone();
        next.insert(0, notification);
        next.truncate(NOTIFICATION_CAP);
        self.kv.put(keys::USER_NOTIFICATIONS, kv::encode(&next)?)?;
        state.notifications = next;
        self.bump(&mut state, UserDataArea::Notifications);
        Ok(())
    }

    /// Marks a notification read. Returns `false` if the ID is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn mark_notification_read(&self, id: &str, read_at_ms: u64) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        let Some(index) = state.notifications.iter().position(|n| n.id == id) else {
            return Ok(false);
        };
        if state.notifications[index].read_at_ms.is_none() {
            let mut next = state.notifications.clone();
            next[index].read_at_ms = Some(read_at_ms);
            self.kv.put(keys::USER_NOTIFICATIONS, kv::encode(&next)?)?;
            state.notifications = next;
            self.bump(&mut state, UserDataArea::Notifications);
        }
        Ok(true)
    }

    // --- offline notification-read queue ---

    /// Queues a notification read that could not reach the server.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn queue_pending_read(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.pending_reads.iter().any(|p| p == id) {
            return Ok(());
        }
        let mut next = state.pending_reads.clone();
        next.push(id.to_string());
        self.kv.put(keys::USER_PENDING_READS, kv::encode(&next)?)?;
        state.pending_reads = next;
        Ok(())
    }

    /// Drains the queued reads for flushing. Unsent IDs should be re-queued.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn take_pending_reads(&self) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.write();
        if state.pending_reads.is_empty() {
            return Ok(Vec::new());
        }
        self.kv.delete(keys::USER_PENDING_READS)?;
        Ok(std::mem::take(&mut state.pending_reads))
    }

    // --- full-state replacement ---

    /// Replaces local state with the server snapshot, preserving locally
    /// pending playlists: for an ID present on both sides the pending local
    /// version wins; pending creates/updates absent from the server are
    /// retained. A `pending_delete` playlist the server no longer has is
    /// dropped (the delete evidently went through).
    ///
    /// Sets `cursor = max(cursor, seq)` and clears the full-resync flag.
    /// The queued offline reads survive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn replace_authoritative(&self, snapshot: &UserStateSnapshot) -> Result<(), StoreError> {
        let mut state = self.state.write();

        let mut playlists: BTreeMap<String, Playlist> = snapshot
            .playlists
            .iter()
            .map(|p| {
                (
                    p.id.clone(),
                    Playlist {
                        id: p.id.clone(),
                        name: p.name.clone(),
                        track_ids: p.track_ids.clone(),
                        sync_status: PlaylistSyncStatus::Synced,
                    },
                )
            })
            .collect();
        for (id, local) in &state.playlists {
            if !local.is_pending() {
                continue;
            }
            if local.sync_status == PlaylistSyncStatus::PendingDelete
                && !playlists.contains_key(id)
            {
                continue;
            }
            playlists.insert(id.clone(), local.clone());
        }

        let mut notifications = snapshot.notifications.clone();
        notifications.truncate(NOTIFICATION_CAP);

        let next = UserState {
            cursor: state.cursor.max(snapshot.seq),
            likes: snapshot.likes.iter().cloned().collect(),
            playlists,
            permissions: snapshot.permissions.iter().cloned().collect(),
            settings: snapshot.settings.clone(),
            notifications,
            pending_reads: state.pending_reads.clone(),
            revision: state.revision,
        };

        let mut ops = Vec::new();
        for (key, _) in self.kv.scan_prefix("user/")? {
            ops.push(WriteOp::delete(key));
        }
        ops.push(WriteOp::delete(keys::NEEDS_USER_FULL_SYNC));
        ops.push(WriteOp::put(keys::USER_CURSOR, kv::encode(&next.cursor)?));
        for like in &next.likes {
            ops.push(WriteOp::put(like_key(like), kv::encode(like)?));
        }
        for playlist in next.playlists.values() {
            ops.push(WriteOp::put(
                format!("{}{}", keys::USER_PLAYLIST_PREFIX, playlist.id),
                kv::encode(playlist)?,
            ));
        }
        for permission in &next.permissions {
            ops.push(WriteOp::put(
                format!("{}{permission}", keys::USER_PERMISSION_PREFIX),
                kv::encode(permission)?,
            ));
        }
        for (key, value) in &next.settings {
            ops.push(WriteOp::put(
                format!("{}{key}", keys::USER_SETTING_PREFIX),
                kv::encode(value)?,
            ));
        }
        ops.push(WriteOp::put(
            keys::USER_NOTIFICATIONS,
            kv::encode(&next.notifications)?,
        ));
        if !next.pending_reads.is_empty() {
            ops.push(WriteOp::put(
                keys::USER_PENDING_READS,
                kv::encode(&next.pending_reads)?,
            ));
        }
        self.kv.write_batch(ops)?;

        *state = next;
        self.bump(&mut state, UserDataArea::All);
        Ok(())
    }
}
