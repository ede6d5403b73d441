//! User-data sync wire messages.
//!
//! Per-user state (likes, playlists, permissions, settings, notifications)
//! replicates through its own append-only event log with a monotone `seq`
//! cursor. These types mirror the JSON bodies of the `/sync/*` endpoints and
//! the `user_sync` push payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ItemKind;

/// A liked piece of content, identified by kind and ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LikeRef {
    pub kind: ItemKind,
    pub id: String,
}

/// Playlist as the server reports it. Sync status is client-local and never
/// appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub id: String,
    pub name: String,
    pub track_ids: Vec<String>,
}

/// A user notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSnapshot {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at_ms: Option<u64>,
}

/// Full user-state snapshot from `GET /sync/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStateSnapshot {
    pub seq: u64,
    pub likes: Vec<LikeRef>,
    pub permissions: Vec<String>,
    pub settings: BTreeMap<String, serde_json::Value>,
    pub playlists: Vec<PlaylistSnapshot>,
    pub notifications: Vec<NotificationSnapshot>,
}

/// One user-data event, as carried in the event log and in `user_sync` pushes.
///
/// Each variant mutates exactly one store. The `Unknown` catch-all absorbs
/// event kinds introduced by newer servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    ContentLiked { kind: ItemKind, id: String },
    ContentUnliked { kind: ItemKind, id: String },
    SettingChanged { key: String, value: serde_json::Value },
    PlaylistCreated { id: String, name: String },
    PlaylistRenamed { id: String, name: String },
    PlaylistDeleted { id: String },
    PlaylistTracksUpdated { id: String, track_ids: Vec<String> },
    PermissionGranted { permission: String },
    PermissionRevoked { permission: String },
    PermissionReset { permissions: Vec<String> },
    NotificationCreated { notification: NotificationSnapshot },
    NotificationRead { id: String, read_at_ms: u64 },
    #[serde(other)]
    Unknown,
}

/// An event with its position in the user log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: UserEvent,
}

/// Batch of events from `GET /sync/events?since=N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<StoredEvent>,
    pub current_seq: u64,
}

/// Structured 410 body when the requested event range has been pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsPrunedBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_event_flattens_tag() {
        let event = StoredEvent {
            seq: 7,
            event: UserEvent::ContentLiked {
                kind: ItemKind::Album,
                id: "b1".to_string(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"seq\":7"));
        assert!(json.contains("\"type\":\"content_liked\""));
        let back: StoredEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn event_taxonomy_round_trips() {
        let events = vec![
            UserEvent::ContentUnliked {
                kind: ItemKind::Track,
                id: "t1".to_string(),
            },
            UserEvent::SettingChanged {
                key: "theme".to_string(),
                value: serde_json::json!("dark"),
            },
            UserEvent::PlaylistCreated {
                id: "p1".to_string(),
                name: "Road Trip".to_string(),
            },
            UserEvent::PlaylistRenamed {
                id: "p1".to_string(),
                name: "Long Road Trip".to_string(),
            },
            UserEvent::PlaylistTracksUpdated {
                id: "p1".to_string(),
                track_ids: vec!["t1".to_string(), "t2".to_string()],
            },
            UserEvent::PlaylistDeleted { id: "p1".to_string() },
            UserEvent::PermissionGranted {
                permission: "download".to_string(),
            },
            UserEvent::PermissionRevoked {
                permission: "download".to_string(),
            },
            UserEvent::PermissionReset {
                permissions: vec!["stream".to_string()],
            },
            UserEvent::NotificationCreated {
                notification: NotificationSnapshot {
                    id: "n1".to_string(),
                    title: "New release".to_string(),
                    body: None,
                    created_at_ms: 1_000,
                    read_at_ms: None,
                },
            },
            UserEvent::NotificationRead {
                id: "n1".to_string(),
                read_at_ms: 2_000,
            },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: UserEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event, back, "round trip failed for {json}");
        }
    }

    #[test]
    fn unknown_event_kind_parses_to_unknown() {
        let event: UserEvent =
            serde_json::from_str(r#"{"type":"avatar_changed","id":"x"}"#).unwrap();
        assert_eq!(event, UserEvent::Unknown);
    }

    #[test]
    fn state_snapshot_parses_wire_example() {
        let json = r#"{
            "seq": 31,
            "likes": [{"kind": "track", "id": "t1"}],
            "permissions": ["stream"],
            "settings": {"quality": "high"},
            "playlists": [{"id": "p1", "name": "Focus", "track_ids": ["t1"]}],
            "notifications": [
                {"id": "n1", "title": "Welcome", "created_at_ms": 5}
            ]
        }"#;
        let state: UserStateSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(state.seq, 31);
        assert_eq!(state.likes[0].kind, ItemKind::Track);
        assert_eq!(state.playlists[0].track_ids, vec!["t1".to_string()]);
        assert_eq!(state.notifications[0].read_at_ms, None);
    }

    #[test]
    fn events_pruned_body_parses() {
        let body: EventsPrunedBody =
            serde_json::from_str(r#"{"error":"events_pruned"}"#).unwrap();
        assert_eq!(body.error, "events_pruned");
    }
}
