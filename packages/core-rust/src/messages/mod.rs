//! Wire message schemas for the catalog and user-data sync protocols.
//!
//! All bodies are JSON with `snake_case` field names. Tagged enums carry an
//! `Unknown` catch-all so newer server message kinds degrade to a skip
//! instead of a parse failure.

pub mod catalog;
pub mod push;
pub mod user_sync;

pub use catalog::{
    SkeletonAlbum, SkeletonChange, SkeletonDelta, SkeletonSnapshot, SkeletonTrack,
    SkeletonVersion, VersionTooOldBody,
};
pub use push::{push_types, CatalogUpdatedPayload, PushEnvelope};
pub use user_sync::{
    EventBatch, EventsPrunedBody, LikeRef, NotificationSnapshot, PlaylistSnapshot, StoredEvent,
    UserEvent, UserStateSnapshot,
};
