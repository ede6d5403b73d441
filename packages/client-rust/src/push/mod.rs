//! Push-message demultiplexer.
//!
//! The push channel hands over textual JSON envelopes; the dispatcher parses
//! them and routes the payload to the handler registered for the type tag.
//! Unrecognized tags and malformed payloads are logged and dropped -- the
//! dispatcher itself never fails.

use std::sync::Arc;

use async_trait::async_trait;
use chorus_core::messages::push::PushEnvelope;
use dashmap::DashMap;
use tracing::{debug, warn};

/// Handler for one push type tag.
///
/// Used as `Arc<dyn PushHandler>`.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Processes the envelope payload. Must not panic on malformed input.
    async fn handle(&self, payload: serde_json::Value);
}

/// Routes push envelopes to registered handlers by type tag.
#[derive(Default)]
pub struct PushDispatcher {
    handlers: DashMap<String, Arc<dyn PushHandler>>,
}

impl PushDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for `kind`.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn PushHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Parses a raw textual message and dispatches it.
    pub async fn dispatch_text(&self, raw: &str) {
        match serde_json::from_str::<PushEnvelope>(raw) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(error) => warn!(error = %error, "dropping malformed push message"),
        }
    }

    /// Dispatches an already-parsed envelope.
    pub async fn dispatch(&self, envelope: PushEnvelope) {
        let handler = self
            .handlers
            .get(&envelope.kind)
            .map(|entry| Arc::clone(entry.value()));
        match handler {
            Some(handler) => handler.handle(envelope.payload).await,
            None => debug!(kind = %envelope.kind, "no handler for push type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
        last: Mutex<Option<serde_json::Value>>,
    }

    #[async_trait]
    impl PushHandler for Recording {
        async fn handle(&self, payload: serde_json::Value) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(payload);
        }
    }

    #[tokio::test]
    async fn routes_by_type_tag() {
        let dispatcher = PushDispatcher::new();
        let catalog = Arc::new(Recording::default());
        let user = Arc::new(Recording::default());
        dispatcher.register("catalog_updated", Arc::clone(&catalog) as Arc<dyn PushHandler>);
        dispatcher.register("user_sync", Arc::clone(&user) as Arc<dyn PushHandler>);

        dispatcher
            .dispatch_text(r#"{"type":"catalog_updated","payload":{"skeleton_version":4}}"#)
            .await;

        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
        assert_eq!(user.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *catalog.last.lock(),
            Some(serde_json::json!({"skeleton_version": 4}))
        );
    }

    #[tokio::test]
    async fn unknown_tag_is_dropped() {
        let dispatcher = PushDispatcher::new();
        let handler = Arc::new(Recording::default());
        dispatcher.register("user_sync", Arc::clone(&handler) as Arc<dyn PushHandler>);

        dispatcher
            .dispatch_text(r#"{"type":"playback_started","payload":{}}"#)
            .await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_message_is_dropped() {
        let dispatcher = PushDispatcher::new();
        let handler = Arc::new(Recording::default());
        dispatcher.register("user_sync", Arc::clone(&handler) as Arc<dyn PushHandler>);

        dispatcher.dispatch_text("{not json").await;
        dispatcher.dispatch_text(r#"{"payload":{}}"#).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn register_replaces_existing_handler() {
        let dispatcher = PushDispatcher::new();
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());
        dispatcher.register("user_sync", Arc::clone(&first) as Arc<dyn PushHandler>);
        dispatcher.register("user_sync", Arc::clone(&second) as Arc<dyn PushHandler>);

        dispatcher
            .dispatch_text(r#"{"type":"user_sync","payload":{"seq":1}}"#)
            .await;
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }
}
