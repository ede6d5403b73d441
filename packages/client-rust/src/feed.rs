//! Change-feed primitive: last-value replay plus subsequent updates.
//!
//! A [`Feed`] delivers `T` values to any number of subscribers. Each
//! subscriber first receives the current value (replay), then every later
//! published value it is fast enough to observe; intermediate values may be
//! skipped under load, which is the right semantics for state feeds.
//!
//! [`FeedRegistry`] manages one feed per key, created lazily on first
//! subscription or publication.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::watch;

/// A broadcast cell holding the latest `T`, observable by N subscribers.
#[derive(Debug)]
pub struct Feed<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + Send + Sync + 'static> Feed<T> {
    /// Creates a feed seeded with `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    /// Publishes a new value, waking all subscribers.
    pub fn publish(&self, value: T) {
        let _ = self.tx.send_replace(value);
    }

    /// Publishes only if the value differs from the current one.
    ///
    /// Keeps subscribers from seeing duplicate consecutive states.
    pub fn publish_if_changed(&self, value: T)
    where
        T: PartialEq,
    {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Returns a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Creates a subscriber that replays the current value first.
    #[must_use]
    pub fn subscribe(&self) -> FeedSubscriber<T> {
        FeedSubscriber {
            rx: self.tx.subscribe(),
            replayed: false,
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side of a [`Feed`].
#[derive(Debug)]
pub struct FeedSubscriber<T> {
    rx: watch::Receiver<T>,
    replayed: bool,
}

impl<T: Clone + Send + Sync + 'static> FeedSubscriber<T> {
    /// Returns the next value: the current value on the first call, then
    /// each subsequent update. Returns `None` only once the publishing side
    /// has been dropped.
    pub async fn next(&mut self) -> Option<T> {
        if !self.replayed {
            self.replayed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Returns the current value without waiting, marking it observed.
    pub fn current(&mut self) -> T {
        self.replayed = true;
        self.rx.borrow_and_update().clone()
    }

    /// Waits for a value newer than the last one observed via
    /// [`FeedSubscriber::current`] or [`FeedSubscriber::next`].
    ///
    /// # Errors
    ///
    /// Returns `Err(())` once the publishing side has been dropped.
    pub async fn changed(&mut self) -> Result<(), ()> {
        self.rx.changed().await.map_err(|_| ())
    }

    /// Adapts the subscriber into a [`Stream`] of values.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|value| (value, sub))
        })
    }
}

/// Lazily-created per-key feeds.
///
/// Senders live for the registry's lifetime, so subscriptions obtained here
/// never terminate while the owning store is alive.
pub struct FeedRegistry<K, T> {
    feeds: DashMap<K, Arc<watch::Sender<T>>>,
}

impl<K, T> std::fmt::Debug for FeedRegistry<K, T>
where
    K: Eq + Hash + std::fmt::Debug,
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRegistry").finish_non_exhaustive()
    }
}

impl<K, T> FeedRegistry<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            feeds: DashMap::new(),
        }
    }

    /// Subscribes to `key`, seeding the feed with `init()` if it does not
    /// exist yet. `init` runs under the per-key lock, so it cannot race a
    /// concurrent [`FeedRegistry::update`] for the same key.
    pub fn subscribe_with(&self, key: K, init: impl FnOnce() -> T) -> FeedSubscriber<T> {
        let tx = self
            .feeds
            .entry(key)
            .or_insert_with(|| Arc::new(watch::Sender::new(init())));
        FeedSubscriber {
            rx: tx.subscribe(),
            replayed: false,
        }
    }

    /// Publishes `value` to the feed for `key` if any subscriber has created
    /// it. Keys nobody observes are not materialized; late subscribers seed
    /// from the backing store instead.
    pub fn update(&self, key: &K, value: T) {
        if let Some(tx) = self.feeds.get(key) {
            let _ = tx.send_replace(value);
        }
    }

    /// Re-publishes a computed value to every existing feed.
    pub fn refresh_all(&self, mut compute: impl FnMut(&K) -> T) {
        for entry in &self.feeds {
            let value = compute(entry.key());
            let _ = entry.value().send_replace(value);
        }
    }

    /// Number of materialized feeds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

impl<K, T> Default for FeedRegistry<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
