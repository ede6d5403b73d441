//! Static-item read path: cache, then store, then scheduled fetch.
//!
//! [`ItemProvider::provide`] returns an [`ItemWatch`], a live sequence of
//! [`ItemStatus`] values. A cache hit yields a single `Loaded` and ends;
//! otherwise the watch combines the entity feed with the fetch-state feed
//! and never terminates while the subscriber keeps listening. Consecutive
//! equal statuses are collapsed, so an error surfaces once per state change.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chorus_core::clock::ClockSource;
use chorus_core::types::{Entity, ItemKind};
use futures_util::Stream;
use metrics::counter;
use tokio::sync::Notify;
use tracing::warn;

use crate::cache::{BoundedCache, CacheMetrics};
use crate::config::CacheConfig;
use crate::feed::FeedSubscriber;
use crate::storage::entities::{EntityObserver, EntityStore};
use crate::storage::fetch_state::{FetchErrorReason, FetchRecord, FetchStateStore, FetchStatus};

/// One observed state of a provided item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemStatus {
    /// No local value yet; a fetch is scheduled or in flight.
    Loading { id: String },
    /// The locally stored entity.
    Loaded { id: String, entity: Entity },
    /// The last fetch failed and its backoff has not elapsed.
    Error { id: String, reason: FetchErrorReason },
}

impl ItemStatus {
    /// The subject item's ID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            ItemStatus::Loading { id }
            | ItemStatus::Loaded { id, .. }
            | ItemStatus::Error { id, .. } => id,
        }
    }
}

type EntityCache = BoundedCache<(ItemKind, String), Entity>;

fn entity_size(entity: &Entity) -> u64 {
    serde_json::to_vec(entity).map_or(0, |bytes| bytes.len() as u64)
}

/// Read-side API over the entity store, fetch-state store, and cache.
pub struct ItemProvider {
    cache: Arc<EntityCache>,
    cache_config: Arc<ArcSwap<CacheConfig>>,
    entities: Arc<EntityStore>,
    fetch_state: Arc<FetchStateStore>,
    clock: Arc<dyn ClockSource>,
    wake: Arc<Notify>,
}

impl ItemProvider {
    /// Builds the provider and registers it as an entity observer so cached
    /// values stay coherent with later store writes.
    #[must_use]
    pub fn new(
        cache_config: Arc<ArcSwap<CacheConfig>>,
        entities: Arc<EntityStore>,
        fetch_state: Arc<FetchStateStore>,
        clock: Arc<dyn ClockSource>,
        wake: Arc<Notify>,
    ) -> Arc<Self> {
        let cache = Arc::new(BoundedCache::new(
            Arc::clone(&cache_config),
            Arc::clone(&clock),
            entity_size,
        ));
        let provider = Arc::new(Self {
            cache,
            cache_config,
            entities: Arc::clone(&entities),
            fetch_state,
            clock,
            wake,
        });
        entities.add_observer(Arc::clone(&provider) as Arc<dyn EntityObserver>);
        provider
    }

    /// Live status sequence for an artist.
    #[must_use]
    pub fn artist(&self, id: &str) -> ItemWatch {
        self.provide(ItemKind::Artist, id)
    }

    /// Live status sequence for an album.
    #[must_use]
    pub fn album(&self, id: &str) -> ItemWatch {
        self.provide(ItemKind::Album, id)
    }

    /// Live status sequence for a track.
    #[must_use]
    pub fn track(&self, id: &str) -> ItemWatch {
        self.provide(ItemKind::Track, id)
    }

    /// Core read path for any entity kind.
    #[must_use]
    pub fn provide(&self, kind: ItemKind, id: &str) -> ItemWatch {
        if self.cache_config.load().enabled {
            if let Some(entity) = self.cache.get(&(kind, id.to_string())) {
                counter!("chorus_provider_cache_hits_total").increment(1);
                return ItemWatch {
                    inner: WatchInner::Settled(Some(ItemStatus::Loaded {
                        id: id.to_string(),
                        entity,
                    })),
                };
            }
        }

        ItemWatch {
            inner: WatchInner::Live(Box::new(LiveWatch {
                kind,
                id: id.to_string(),
                entity_sub: self.entities.observe(kind, id),
                fetch_sub: self.fetch_state.observe(id),
                fetch_state: Arc::clone(&self.fetch_state),
                cache: Arc::clone(&self.cache),
                cache_config: Arc::clone(&self.cache_config),
                clock: Arc::clone(&self.clock),
                wake: Arc::clone(&self.wake),
                last: None,
                cache_primed: false,
            })),
        }
    }

    /// Counter snapshot of the in-memory cache.
    #[must_use]
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Zeros the cache counters.
    pub fn reset_cache_metrics(&self) {
        self.cache.reset_metrics();
    }
}

impl EntityObserver for ItemProvider {
    fn on_put(&self, entity: &Entity) {
        // Refresh only keys someone already materialized; population itself
        // happens on first observation in the watch.
        let key = (entity.kind(), entity.id().to_string());
        if self.cache.contains_key(&key) {
            self.cache.put(key, entity.clone());
        }
    }

    fn on_remove(&self, kind: ItemKind, id: &str) {
        self.cache.remove(&(kind, id.to_string()));
    }
}

/// A live (or settled) sequence of [`ItemStatus`] values.
pub struct ItemWatch {
    inner: WatchInner,
}

enum WatchInner {
    /// Cache-hit fast path: one value, then the sequence ends.
    Settled(Option<ItemStatus>),
    Live(Box<LiveWatch>),
}

struct LiveWatch {
    kind: ItemKind,
    id: String,
    entity_sub: FeedSubscriber<Option<Entity>>,
    fetch_sub: FeedSubscriber<Option<FetchRecord>>,
    fetch_state: Arc<FetchStateStore>,
    cache: Arc<EntityCache>,
    cache_config: Arc<ArcSwap<CacheConfig>>,
    clock: Arc<dyn ClockSource>,
    wake: Arc<Notify>,
    last: Option<ItemStatus>,
    cache_primed: bool,
}

impl ItemWatch {
    /// Returns the next status. `None` means the sequence is over: either
    /// the cache-hit value was already delivered, or the backing stores are
    /// gone.
    pub async fn next(&mut self) -> Option<ItemStatus> {
        match &mut self.inner {
            WatchInner::Settled(value) => value.take(),
            WatchInner::Live(live) => live.next().await,
        }
    }

    /// Adapts the watch into a [`Stream`] of statuses.
    pub fn into_stream(self) -> impl Stream<Item = ItemStatus> {
        futures_util::stream::unfold(self, |mut watch| async move {
            watch.next().await.map(|status| (status, watch))
        })
    }
}

impl LiveWatch {
    async fn next(&mut self) -> Option<ItemStatus> {
        loop {
            let entity = self.entity_sub.current();
            let record = self.fetch_sub.current();
            let status = self.evaluate(entity, record);

            if self.last.as_ref() != Some(&status) {
                self.last = Some(status.clone());
                return Some(status);
            }

            tokio::select! {
                changed = self.entity_sub.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = self.fetch_sub.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// The §4.4 decision table: store value wins; otherwise the fetch
    /// record decides between Loading and Error, scheduling a fetch when
    /// none is live.
    fn evaluate(&mut self, entity: Option<Entity>, record: Option<FetchRecord>) -> ItemStatus {
        if let Some(entity) = entity {
            if !self.cache_primed {
                self.cache_primed = true;
                if self.cache_config.load().enabled {
                    self.cache
                        .put((self.kind, self.id.clone()), entity.clone());
                }
            }
            return ItemStatus::Loaded {
                id: self.id.clone(),
                entity,
            };
        }

        let now = self.clock.now_ms();
        match record {
            None => {
                self.schedule_fetch(now);
                ItemStatus::Loading {
                    id: self.id.clone(),
                }
            }
            Some(record) => match record.status {
                FetchStatus::Idle | FetchStatus::Loading => ItemStatus::Loading {
                    id: self.id.clone(),
                },
                FetchStatus::Error => {
                    if record.retry_after_ms.is_none_or(|t| t <= now) {
                        self.schedule_fetch(now);
                        ItemStatus::Loading {
                            id: self.id.clone(),
                        }
                    } else {
                        ItemStatus::Error {
                            id: self.id.clone(),
                            reason: record.error_reason.unwrap_or(FetchErrorReason::Unknown),
                        }
                    }
                }
            },
        }
    }

    fn schedule_fetch(&self, now: u64) {
        match self
            .fetch_state
            .mark_idle_for_fetch(&self.id, self.kind, now)
        {
            Ok(true) => self.wake.notify_one(),
            Ok(false) => {}
            Err(error) => {
                warn!(id = %self.id, kind = %self.kind, error = %error, "failed to schedule fetch");
            }
        }
    }
}
