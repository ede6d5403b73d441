//! Push-channel message envelope.
//!
//! The push channel delivers textual JSON messages of the shape
//! `{ "type": string, "payload": object }`. Only the envelope is defined
//! here; payload interpretation belongs to the registered handler for each
//! type tag.

use serde::{Deserialize, Serialize};

/// Recognized push type tags.
pub mod push_types {
    /// Catalog skeleton advanced on the server; payload carries `skeleton_version`.
    pub const CATALOG_UPDATED: &str = "catalog_updated";
    /// A user-data event; payload is a `StoredEvent`.
    pub const USER_SYNC: &str = "user_sync";
}

/// Generic push message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Payload of a `catalog_updated` push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogUpdatedPayload {
    pub skeleton_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let envelope = PushEnvelope {
            kind: push_types::CATALOG_UPDATED.to_string(),
            payload: serde_json::json!({"skeleton_version": 12}),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"catalog_updated\""));
        let back: PushEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn catalog_updated_payload_parses() {
        let payload: CatalogUpdatedPayload =
            serde_json::from_str(r#"{"skeleton_version": 99}"#).unwrap();
        assert_eq!(payload.skeleton_version, 99);
    }
}
