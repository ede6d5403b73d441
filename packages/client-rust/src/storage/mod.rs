//! Persistence layer for the Chorus client.
//!
//! Layered like the rest of the storage stack:
//!
//! - **Engine** ([`kv`]): flat byte store with prefix scans and atomic
//!   batches ([`memory::MemoryKvStore`]; [`redb_store::RedbKvStore`] behind
//!   the `redb` feature)
//! - **Tables**: typed stores built on the engine, each pairing durable rows
//!   with change feeds -- [`entities::EntityStore`],
//!   [`fetch_state::FetchStateStore`], [`skeleton::SkeletonStore`],
//!   [`user_data::UserDataStore`]

pub mod entities;
pub mod fetch_state;
pub mod kv;
pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;
pub mod skeleton;
pub mod user_data;

pub use entities::{EntityObserver, EntityStore};
pub use fetch_state::{FetchErrorReason, FetchRecord, FetchStateStore, FetchStatus};
pub use kv::{keys, KeyValueStore, StoreError, WriteOp};
pub use memory::MemoryKvStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbKvStore;
pub use skeleton::SkeletonStore;
pub use user_data::{
    Playlist, PlaylistSyncStatus, UserDataArea, UserDataRevision, UserDataStore, NOTIFICATION_CAP,
};
