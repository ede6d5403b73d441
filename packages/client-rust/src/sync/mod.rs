//! Synchronizer drivers for the catalog skeleton and the user-data log.
//!
//! Both follow the same shape: a serialized entry point, a phase feed for
//! observers, and a cancelable retry timer armed on transient failure.

pub mod retry;
pub mod skeleton;
pub mod user_data;

use thiserror::Error;

use crate::storage::kv::StoreError;
use crate::transport::TransportError;

pub use retry::RetrySchedule;
pub use skeleton::SkeletonSynchronizer;
pub use user_data::UserDataEngine;

/// Observable synchronizer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    /// Never run, or reset by `cleanup`.
    Idle,
    /// A sync pass is in flight.
    Syncing,
    /// The last pass succeeded at this version/sequence.
    Synced { version: u64 },
    /// The last pass failed; a retry is scheduled.
    Error { reason: String },
}

/// Failure of a sync pass. Synchronizers classify and retry internally;
/// this type never crosses to callers of the public entry points.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unknown playlist {0}")]
    UnknownPlaylist(String),
}
