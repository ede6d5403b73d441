//! Per-item fetch lifecycle records.
//!
//! One durable record per pending or errored item; a successful fetch
//! deletes the record. Legal transitions:
//!
//! ```text
//! (absent) -> idle -> loading -> (absent, on success)
//!                              -> error -> idle (after backoff)
//! ```
//!
//! `loading` is never durable across a restart: [`FetchStateStore::reset_loading_to_idle`]
//! runs once at fetcher startup.

use std::fmt;
use std::sync::Arc;

use chorus_core::types::ItemKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::kv::{self, keys, KeyValueStore, StoreError, WriteOp};
use crate::feed::{FeedRegistry, FeedSubscriber};

/// Lifecycle state of a fetch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    Loading,
    Error,
}

/// Why a fetch failed, per the outcome classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorReason {
    /// Transient reachability problem.
    Network,
    /// Credentials rejected (401/403).
    Unauthorized,
    /// Resource does not exist (404).
    NotFound,
    /// Malformed payload or local store failure.
    Client,
    /// Anything else.
    Unknown,
}

impl fmt::Display for FetchErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchErrorReason::Network => "network",
            FetchErrorReason::Unauthorized => "unauthorized",
            FetchErrorReason::NotFound => "not_found",
            FetchErrorReason::Client => "client",
            FetchErrorReason::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Durable fetch-state record. At most one exists per `item_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
    pub item_id: String,
    pub item_kind: ItemKind,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<FetchErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl FetchRecord {
    /// A fresh idle record, ready for the fetcher to pick up.
    #[must_use]
    pub fn idle(item_id: impl Into<String>, item_kind: ItemKind) -> Self {
        Self {
            item_id: item_id.into(),
            item_kind,
            status: FetchStatus::Idle,
            error_reason: None,
            last_attempt_ms: None,
            retry_after_ms: None,
        }
    }

    /// Whether this record is ready for a (re)fetch at `now`: idle, or
    /// errored with an elapsed backoff deadline.
    #[must_use]
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.status {
            FetchStatus::Idle => self.retry_after_ms.is_none_or(|t| t <= now_ms),
            FetchStatus::Error => self.retry_after_ms.is_none_or(|t| t <= now_ms),
            FetchStatus::Loading => false,
        }
    }
}

fn record_key(item_id: &str) -> String {
    format!("{}{}", keys::FETCH_STATE_PREFIX, item_id)
}

/// Durable table of fetch records plus a feed per `item_id`.
///
/// Record transitions are serialized by an internal mutex so the
/// one-record-per-item invariant holds under concurrent providers.
pub struct FetchStateStore {
    kv: Arc<dyn KeyValueStore>,
    feeds: FeedRegistry<String, Option<FetchRecord>>,
    transitions: Mutex<()>,
}

impl FetchStateStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            feeds: FeedRegistry::new(),
            transitions: Mutex::new(()),
        }
    }

    /// Upserts `record` and notifies observers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails.
    pub fn store(&self, record: &FetchRecord) -> Result<(), StoreError> {
        let _guard = self.transitions.lock();
        self.persist(record)
    }

    /// Reads the current record for `item_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails or the payload is
    /// corrupt.
    pub fn get(&self, item_id: &str) -> Result<Option<FetchRecord>, StoreError> {
        match self.kv.get(&record_key(item_id))? {
            Some(bytes) => Ok(Some(kv::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Subscribes to the record feed for `item_id`, seeded with its current
    /// value (or `None` when absent).
    pub fn observe(&self, item_id: &str) -> FeedSubscriber<Option<FetchRecord>> {
        self.feeds
            .subscribe_with(item_id.to_string(), || match self.get(item_id) {
                Ok(record) => record,
                Err(error) => {
                    warn!(item_id, error = %error, "failed to seed fetch-state feed");
                    None
                }
            })
    }

    /// Snapshot of records due for a fetch at `now_ms`: idle records plus
    /// errored records whose backoff deadline has passed (those count as
    /// idle again, which is what makes scheduled retries automatic).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the scan fails; corrupt rows are skipped
    /// with a warning.
    pub fn get_idle(&self, now_ms: u64) -> Result<Vec<FetchRecord>, StoreError> {
        let mut due = Vec::new();
        for (key, bytes) in self.kv.scan_prefix(keys::FETCH_STATE_PREFIX)? {
            match kv::decode::<FetchRecord>(&bytes) {
                Ok(record) if record.is_due(now_ms) => due.push(record),
                Ok(_) => {}
                Err(error) => warn!(key = %key, error = %error, "skipping corrupt fetch record"),
            }
        }
        Ok(due)
    }

    /// Number of records currently in `loading` state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the scan fails.
    pub fn loading_count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for (_, bytes) in self.kv.scan_prefix(keys::FETCH_STATE_PREFIX)? {
            if let Ok(record) = kv::decode::<FetchRecord>(&bytes) {
                if record.status == FetchStatus::Loading {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Deletes the record (the success path) and notifies observers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn delete(&self, item_id: &str) -> Result<(), StoreError> {
        let _guard = self.transitions.lock();
        self.kv.delete(&record_key(item_id))?;
        self.feeds.update(&item_id.to_string(), None);
        Ok(())
    }

    /// Demotes every `loading` record back to `idle`.
    ///
    /// Run once at fetcher startup: `loading` only describes an in-flight
    /// attempt of the current process.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the scan or the batch write fails.
    pub fn reset_loading_to_idle(&self) -> Result<(), StoreError> {
        let _guard = self.transitions.lock();
        let mut ops = Vec::new();
        let mut reset = Vec::new();
        for (key, bytes) in self.kv.scan_prefix(keys::FETCH_STATE_PREFIX)? {
            if let Ok(mut record) = kv::decode::<FetchRecord>(&bytes) {
                if record.status == FetchStatus::Loading {
                    record.status = FetchStatus::Idle;
                    ops.push(WriteOp::Put {
                        key,
                        value: kv::encode(&record)?,
                    });
                    reset.push(record);
                }
            }
        }
        if ops.is_empty() {
            return Ok(());
        }
        self.kv.write_batch(ops)?;
        for record in reset {
            let item_id = record.item_id.clone();
            self.feeds.update(&item_id, Some(record));
        }
        Ok(())
    }

    /// Conditionally schedules a fetch: creates an idle record when none
    /// exists, or re-arms an errored record whose backoff has elapsed.
    /// Returns `true` if a fetch was scheduled; `false` leaves the existing
    /// record (idle, loading, or still-backing-off error) untouched, which
    /// is what keeps a single item from having two fetches in flight.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn mark_idle_for_fetch(
        &self,
        item_id: &str,
        item_kind: ItemKind,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let _guard = self.transitions.lock();
        let schedule = match self.get(item_id)? {
            None => true,
            Some(record) => {
                record.status == FetchStatus::Error
                    && record.retry_after_ms.is_none_or(|t| t <= now_ms)
            }
        };
        if schedule {
            self.persist(&FetchRecord::idle(item_id, item_kind))?;
        }
        Ok(schedule)
    }

    /// Marks the record as loading with the attempt timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn mark_loading(&self, item_id: &str, item_kind: ItemKind, now_ms: u64) -> Result<(), StoreError> {
        let _guard = self.transitions.lock();
        let mut record = self
            .get(item_id)?
            .unwrap_or_else(|| FetchRecord::idle(item_id, item_kind));
        record.status = FetchStatus::Loading;
        record.error_reason = None;
        record.last_attempt_ms = Some(now_ms);
        record.retry_after_ms = None;
        self.persist(&record)
    }

    /// Marks the record as errored with a retry deadline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn mark_error(
        &self,
        item_id: &str,
        item_kind: ItemKind,
        reason: FetchErrorReason,
        last_attempt_ms: u64,
        retry_after_ms: u64,
    ) -> Result<(), StoreError> {
        let _guard = self.transitions.lock();
        self.persist(&FetchRecord {
            item_id: item_id.to_string(),
            item_kind,
            status: FetchStatus::Error,
            error_reason: Some(reason),
            last_attempt_ms: Some(last_attempt_ms),
            retry_after_ms: Some(retry_after_ms),
        })
    }

    fn persist(&self, record: &FetchRecord) -> Result<(), StoreError> {
        self.kv
            .put(&record_key(&record.item_id), kv::encode(record)?)?;
        self.feeds.update(&record.item_id, Some(record.clone()));
        Ok(())
    }
}
