//! Background fetch loop.
//!
//! A single cooperative loop per process drains due fetch records, calls the
//! transport per item kind, and persists the classified outcome. Between
//! iterations it sleeps on a geometric schedule (5 ms, x1.4, capped at 10 s);
//! a wake signal resets the schedule and forces an immediate re-snapshot.
//! With nothing pending and nothing loading, the loop parks on the wake
//! signal instead of polling.

use std::sync::Arc;
use std::time::Duration;

use chorus_core::clock::ClockSource;
use chorus_core::types::{Entity, ItemKind};
use metrics::counter;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::classify::{classify_store_error, classify_transport_error};
use crate::config::FetcherConfig;
use crate::storage::entities::EntityStore;
use crate::storage::fetch_state::{FetchErrorReason, FetchRecord, FetchStateStore};
use crate::transport::CatalogTransport;

/// Geometric inter-iteration sleep schedule.
#[derive(Debug)]
pub struct FetchSleep {
    config: FetcherConfig,
    current: Duration,
}

impl FetchSleep {
    #[must_use]
    pub fn new(config: FetcherConfig) -> Self {
        let current = config.min_sleep;
        Self { config, current }
    }

    /// Returns the sleep to take now, then advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .mul_f64(self.config.backoff_multiplier)
            .min(self.config.max_sleep);
        delay
    }

    /// Restores the schedule to its minimum (a wake happened).
    pub fn reset(&mut self) {
        self.current = self.config.min_sleep;
    }

    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// The background fetcher. Construct once, then run its loop as an owned
/// task; wake it through the shared [`Notify`] handle.
pub struct Fetcher {
    fetch_state: Arc<FetchStateStore>,
    entities: Arc<EntityStore>,
    transport: Arc<dyn CatalogTransport>,
    clock: Arc<dyn ClockSource>,
    wake: Arc<Notify>,
    config: FetcherConfig,
}

impl Fetcher {
    #[must_use]
    pub fn new(
        fetch_state: Arc<FetchStateStore>,
        entities: Arc<EntityStore>,
        transport: Arc<dyn CatalogTransport>,
        clock: Arc<dyn ClockSource>,
        wake: Arc<Notify>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            fetch_state,
            entities,
            transport,
            clock,
            wake,
            config,
        }
    }

    /// The shared wake handle. `notify_one` on it is the `wake_up()` call:
    /// idempotent within a cycle (the permit does not accumulate) and
    /// effective even if sent while the loop is mid-iteration.
    #[must_use]
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Runs the loop until `stop` is cancelled. A cancellation observed
    /// mid-iteration finishes persisting the in-flight record first, so no
    /// `loading` record is ever abandoned.
    pub async fn run(self, stop: CancellationToken) {
        if let Err(e) = self.fetch_state.reset_loading_to_idle() {
            error!(error = %e, "failed to reset loading records at startup");
        }

        let mut sleep = FetchSleep::new(self.config.clone());
        loop {
            if stop.is_cancelled() {
                break;
            }

            let now = self.clock.now_ms();
            let due = match self.fetch_state.get_idle(now) {
                Ok(records) => records,
                Err(e) => {
                    error!(error = %e, "failed to snapshot idle fetch records");
                    Vec::new()
                }
            };

            if due.is_empty() {
                let loading = self.fetch_state.loading_count().unwrap_or(0);
                if loading == 0 {
                    // Nothing to do at all: park on the wake signal.
                    tokio::select! {
                        () = self.wake.notified() => sleep.reset(),
                        () = stop.cancelled() => break,
                    }
                } else {
                    // Stale loading records exist; recheck after one step.
                    let delay = sleep.next_delay();
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.wake.notified() => sleep.reset(),
                        () = stop.cancelled() => break,
                    }
                }
                continue;
            }

            for record in due {
                if stop.is_cancelled() {
                    break;
                }
                self.process(record).await;
            }

            let delay = sleep.next_delay();
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.wake.notified() => sleep.reset(),
                () = stop.cancelled() => break,
            }
        }
        debug!("fetcher loop stopped");
    }

    async fn process(&self, record: FetchRecord) {
        let id = record.item_id.as_str();
        let kind = record.item_kind;
        let started = self.clock.now_ms();

        if let Err(e) = self.fetch_state.mark_loading(id, kind, started) {
            error!(id, %kind, error = %e, "failed to mark record loading");
            return;
        }

        let fetched: Result<Entity, _> = match kind {
            ItemKind::Artist => self.transport.fetch_artist(id).await.map(Entity::Artist),
            ItemKind::Album => self.transport.fetch_album(id).await.map(Entity::Album),
            ItemKind::Track => self.transport.fetch_track(id).await.map(Entity::Track),
        };

        let now = self.clock.now_ms();
        match fetched {
            Ok(entity) => match self.entities.put(&entity) {
                Ok(()) => {
                    counter!("chorus_fetch_success_total").increment(1);
                    if let Err(e) = self.fetch_state.delete(id) {
                        error!(id, %kind, error = %e, "failed to clear fetch record");
                    }
                }
                Err(store_error) => {
                    let (reason, delay) = classify_store_error();
                    warn!(id, %kind, error = %store_error, "stored fetch result rejected");
                    counter!("chorus_fetch_failure_total").increment(1);
                    self.persist_error(id, kind, reason, now, delay);
                }
            },
            Err(transport_error) => {
                let (reason, delay) = classify_transport_error(&transport_error);
                warn!(id, %kind, %reason, error = %transport_error, "fetch failed");
                counter!("chorus_fetch_failure_total").increment(1);
                self.persist_error(id, kind, reason, now, delay);
            }
        }
    }

    fn persist_error(
        &self,
        id: &str,
        kind: ItemKind,
        reason: FetchErrorReason,
        now: u64,
        delay: Duration,
    ) {
        let retry_after = now + u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if let Err(e) = self
            .fetch_state
            .mark_error(id, kind, reason, now, retry_after)
        {
            error!(id, %kind, error = %e, "failed to persist fetch error");
        }
    }
}
