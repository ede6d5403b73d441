//! Static-item table with per-item change feeds.
//!
//! Entities are written only by the background fetcher (and by a full
//! catalog wipe); readers observe them through per-item feeds so the
//! provider never polls.

use std::sync::Arc;

use chorus_core::types::{Entity, ItemKind};
use parking_lot::RwLock;
use tracing::warn;

use super::kv::{self, keys, KeyValueStore, StoreError};
use crate::feed::{FeedRegistry, FeedSubscriber};

fn entity_key(kind: ItemKind, id: &str) -> String {
    format!("{}{}/{}", keys::ENTITY_PREFIX, kind.as_str(), id)
}

/// Observer for entity mutations, notified after the write lands.
///
/// Used as `Arc<dyn EntityObserver>`; the provider registers one to keep its
/// in-memory cache coherent with the store.
pub trait EntityObserver: Send + Sync {
    /// Called after an entity is inserted or replaced.
    fn on_put(&self, entity: &Entity);

    /// Called after an entity is removed.
    fn on_remove(&self, kind: ItemKind, id: &str);
}

/// Durable table of fetched entities plus a feed per `(kind, id)`.
pub struct EntityStore {
    kv: Arc<dyn KeyValueStore>,
    feeds: FeedRegistry<(ItemKind, String), Option<Entity>>,
    observers: RwLock<Vec<Arc<dyn EntityObserver>>>,
}

impl EntityStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            feeds: FeedRegistry::new(),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registers an observer for subsequent mutations.
    pub fn add_observer(&self, observer: Arc<dyn EntityObserver>) {
        self.observers.write().push(observer);
    }

    /// Reads the stored entity, or `None` if it was never fetched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails or the payload is
    /// corrupt.
    pub fn get(&self, kind: ItemKind, id: &str) -> Result<Option<Entity>, StoreError> {
        match self.kv.get(&entity_key(kind, id))? {
            Some(bytes) => Ok(Some(kv::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Inserts or replaces the entity and notifies observers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting fails; observers are only
    /// notified after a successful write.
    pub fn put(&self, entity: &Entity) -> Result<(), StoreError> {
        let key = (entity.kind(), entity.id().to_string());
        self.kv
            .put(&entity_key(entity.kind(), entity.id()), kv::encode(entity)?)?;
        self.feeds.update(&key, Some(entity.clone()));
        for observer in self.observers.read().iter() {
            observer.on_put(entity);
        }
        Ok(())
    }

    /// Removes the entity and notifies observers with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store fails.
    pub fn remove(&self, kind: ItemKind, id: &str) -> Result<(), StoreError> {
        self.kv.delete(&entity_key(kind, id))?;
        self.feeds.update(&(kind, id.to_string()), None);
        for observer in self.observers.read().iter() {
            observer.on_remove(kind, id);
        }
        Ok(())
    }

    /// Subscribes to the entity's feed, seeded with its current stored value.
    ///
    /// A corrupt stored payload seeds `None` (and is logged) rather than
    /// failing the subscription.
    pub fn observe(&self, kind: ItemKind, id: &str) -> FeedSubscriber<Option<Entity>> {
        self.feeds
            .subscribe_with((kind, id.to_string()), || match self.get(kind, id) {
                Ok(entity) => entity,
                Err(error) => {
                    warn!(kind = %kind, id, error = %error, "failed to seed entity feed");
                    None
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use chorus_core::types::{Artist, ArtistKind};

    use super::*;
    use crate::storage::memory::MemoryKvStore;

    fn artist(id: &str) -> Entity {
        Entity::Artist(Artist {
            id: id.to_string(),
            display_name: format!("Artist {id}"),
            image_id: None,
            kind: ArtistKind::Individual,
            members_ids: None,
        })
    }

    #[test]
    fn put_then_get_round_trip() {
        let store = EntityStore::new(Arc::new(MemoryKvStore::new()));
        store.put(&artist("a1")).unwrap();

        let loaded = store.get(ItemKind::Artist, "a1").unwrap().unwrap();
        assert_eq!(loaded.id(), "a1");
        assert_eq!(store.get(ItemKind::Artist, "missing").unwrap(), None);
    }

    #[test]
    fn kinds_do_not_collide() {
        let store = EntityStore::new(Arc::new(MemoryKvStore::new()));
        store.put(&artist("x")).unwrap();
        assert_eq!(store.get(ItemKind::Album, "x").unwrap(), None);
    }

    #[tokio::test]
    async fn observe_replays_stored_value_then_updates() {
        let store = EntityStore::new(Arc::new(MemoryKvStore::new()));
        store.put(&artist("a1")).unwrap();

        let mut sub = store.observe(ItemKind::Artist, "a1");
        assert!(sub.next().await.unwrap().is_some());

        store.remove(ItemKind::Artist, "a1").unwrap();
        assert!(sub.next().await.unwrap().is_none());
    }

    #[test]
    fn observers_are_notified_after_mutations() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct Counting {
            puts: AtomicUsize,
            removes: AtomicUsize,
        }
        impl EntityObserver for Counting {
            fn on_put(&self, _: &Entity) {
                self.puts.fetch_add(1, Ordering::Relaxed);
            }
            fn on_remove(&self, _: ItemKind, _: &str) {
                self.removes.fetch_add(1, Ordering::Relaxed);
            }
        }

        let store = EntityStore::new(Arc::new(MemoryKvStore::new()));
        let observer = Arc::new(Counting::default());
        store.add_observer(Arc::clone(&observer) as Arc<dyn EntityObserver>);

        store.put(&artist("a1")).unwrap();
        store.remove(ItemKind::Artist, "a1").unwrap();

        assert_eq!(observer.puts.load(Ordering::Relaxed), 1);
        assert_eq!(observer.removes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn observe_miss_seeds_none_then_sees_put() {
        let store = EntityStore::new(Arc::new(MemoryKvStore::new()));

        let mut sub = store.observe(ItemKind::Artist, "a1");
        assert!(sub.next().await.unwrap().is_none());

        store.put(&artist("a1")).unwrap();
        let seen = sub.next().await.unwrap();
        assert_eq!(seen.map(|e| e.id().to_string()), Some("a1".to_string()));
    }
}
