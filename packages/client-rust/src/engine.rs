//! Engine assembly: constructs the stores, provider, fetcher, synchronizers,
//! and push routing, and owns their lifecycles.
//!
//! Background work is acquired at construction and released by
//! [`ClientEngine::shutdown`]: the fetcher task is joined after its stop
//! token fires, and both synchronizers' retry timers are cancelled.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chorus_core::clock::ClockSource;
use chorus_core::messages::push::{push_types, CatalogUpdatedPayload};
use chorus_core::messages::user_sync::StoredEvent;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{CacheConfig, ClientConfig};
use crate::fetcher::Fetcher;
use crate::provider::ItemProvider;
use crate::push::{PushDispatcher, PushHandler};
use crate::storage::entities::EntityStore;
use crate::storage::fetch_state::FetchStateStore;
use crate::storage::kv::{KeyValueStore, StoreError};
use crate::storage::skeleton::SkeletonStore;
use crate::storage::user_data::UserDataStore;
use crate::sync::{SkeletonSynchronizer, UserDataEngine};
use crate::transport::CatalogTransport;

/// The assembled client core.
///
/// Construct with [`ClientEngine::start`] from within a tokio runtime; the
/// fetcher loop is spawned immediately. Everything hangs off the supplied
/// key-value store and transport, so both stay swappable.
pub struct ClientEngine {
    cache_config: Arc<ArcSwap<CacheConfig>>,
    entities: Arc<EntityStore>,
    fetch_state: Arc<FetchStateStore>,
    skeleton_store: Arc<SkeletonStore>,
    user_store: Arc<UserDataStore>,
    provider: Arc<ItemProvider>,
    skeleton_sync: Arc<SkeletonSynchronizer>,
    user_sync: Arc<UserDataEngine>,
    dispatcher: Arc<PushDispatcher>,
    wake: Arc<Notify>,
    stop: CancellationToken,
    fetcher_task: Option<JoinHandle<()>>,
}

impl ClientEngine {
    /// Builds the engine and spawns the fetcher loop.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if rebuilding store state from `kv` fails.
    pub fn start(
        config: ClientConfig,
        kv: Arc<dyn KeyValueStore>,
        transport: Arc<dyn CatalogTransport>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, StoreError> {
        let cache_config = Arc::new(ArcSwap::from_pointee(config.cache.clone()));
        let wake = Arc::new(Notify::new());
        let stop = CancellationToken::new();

        let entities = Arc::new(EntityStore::new(Arc::clone(&kv)));
        let fetch_state = Arc::new(FetchStateStore::new(Arc::clone(&kv)));
        let skeleton_store = Arc::new(SkeletonStore::open(Arc::clone(&kv))?);
        let user_store = Arc::new(UserDataStore::open(Arc::clone(&kv))?);

        let provider = ItemProvider::new(
            Arc::clone(&cache_config),
            Arc::clone(&entities),
            Arc::clone(&fetch_state),
            Arc::clone(&clock),
            Arc::clone(&wake),
        );

        let fetcher = Fetcher::new(
            Arc::clone(&fetch_state),
            Arc::clone(&entities),
            Arc::clone(&transport),
            Arc::clone(&clock),
            Arc::clone(&wake),
            config.fetcher.clone(),
        );
        let fetcher_task = tokio::spawn(fetcher.run(stop.clone()));

        let skeleton_sync = SkeletonSynchronizer::new(
            Arc::clone(&skeleton_store),
            Arc::clone(&transport),
            config.sync_retry.clone(),
            stop.child_token(),
        );
        let user_sync = UserDataEngine::new(
            Arc::clone(&user_store),
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.sync_retry.clone(),
            stop.child_token(),
        );

        let dispatcher = Arc::new(PushDispatcher::new());
        dispatcher.register(
            push_types::CATALOG_UPDATED,
            Arc::new(CatalogUpdatedHandler {
                sync: Arc::clone(&skeleton_sync),
                store: Arc::clone(&skeleton_store),
            }) as Arc<dyn PushHandler>,
        );
        dispatcher.register(
            push_types::USER_SYNC,
            Arc::new(UserSyncHandler {
                engine: Arc::clone(&user_sync),
            }) as Arc<dyn PushHandler>,
        );

        Ok(Self {
            cache_config,
            entities,
            fetch_state,
            skeleton_store,
            user_store,
            provider,
            skeleton_sync,
            user_sync,
            dispatcher,
            wake,
            stop,
            fetcher_task: Some(fetcher_task),
        })
    }

    /// Static-item read API.
    #[must_use]
    pub fn provider(&self) -> &Arc<ItemProvider> {
        &self.provider
    }

    /// Skeleton graph store (observation feeds live here).
    #[must_use]
    pub fn skeleton(&self) -> &Arc<SkeletonStore> {
        &self.skeleton_store
    }

    /// Skeleton protocol driver.
    #[must_use]
    pub fn skeleton_sync(&self) -> &Arc<SkeletonSynchronizer> {
        &self.skeleton_sync
    }

    /// User-data engine (optimistic writes and sync entry points).
    #[must_use]
    pub fn user_sync(&self) -> &Arc<UserDataEngine> {
        &self.user_sync
    }

    /// User-data store for reads.
    #[must_use]
    pub fn user_data(&self) -> &Arc<UserDataStore> {
        &self.user_store
    }

    /// Entity store (the fetcher's write target).
    #[must_use]
    pub fn entities(&self) -> &Arc<EntityStore> {
        &self.entities
    }

    /// Fetch-state store.
    #[must_use]
    pub fn fetch_state(&self) -> &Arc<FetchStateStore> {
        &self.fetch_state
    }

    /// Push-message entry point for the transport's push channel.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<PushDispatcher> {
        &self.dispatcher
    }

    /// Wakes the fetcher (e.g. a pull-to-refresh gesture).
    pub fn wake_fetcher(&self) {
        self.wake.notify_one();
    }

    /// Swaps the cache caps; the cache reads them on its next operation.
    pub fn set_cache_config(&self, config: CacheConfig) {
        self.cache_config.store(Arc::new(config));
    }

    /// Stops the fetcher loop and both synchronizers, waiting for the
    /// in-flight fetch (if any) to finish persisting.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(task) = self.fetcher_task.take() {
            if let Err(error) = task.await {
                warn!(error = %error, "fetcher task join failed");
            }
        }
        self.skeleton_sync.cleanup();
        self.user_sync.cleanup();
    }
}

/// Routes `catalog_updated` pushes into the skeleton synchronizer.
struct CatalogUpdatedHandler {
    sync: Arc<SkeletonSynchronizer>,
    store: Arc<SkeletonStore>,
}

#[async_trait]
impl PushHandler for CatalogUpdatedHandler {
    async fn handle(&self, payload: serde_json::Value) {
        match serde_json::from_value::<CatalogUpdatedPayload>(payload) {
            Ok(update) => {
                if update.skeleton_version > self.store.version() {
                    self.sync.sync().await;
                } else {
                    debug!(
                        version = update.skeleton_version,
                        "catalog push at or below local version"
                    );
                }
            }
            Err(error) => warn!(error = %error, "dropping malformed catalog_updated payload"),
        }
    }
}

/// Routes `user_sync` pushes into the user-data engine.
struct UserSyncHandler {
    engine: Arc<UserDataEngine>,
}

#[async_trait]
impl PushHandler for UserSyncHandler {
    async fn handle(&self, payload: serde_json::Value) {
        match serde_json::from_value::<StoredEvent>(payload) {
            Ok(event) => self.engine.handle_event(event).await,
            Err(error) => warn!(error = %error, "dropping malformed user_sync payload"),
        }
    }
}
