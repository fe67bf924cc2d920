//! Per-device state reducer
//!
//! A [`Coordinator`] owns the canonical [`DeviceState`] of one device. On
//! [`Coordinator::start`] it subscribes every configured state topic and
//! binds each to the field's parser; from then on every accepted payload
//! replaces exactly one field and is broadcast to observers. Rejected
//! payloads are logged and change nothing.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::bus::{Message, MessageBus, MessageHandler, SubscriptionGuard};
use crate::config::ValidatedConfig;
use crate::error::{BridgeError, Result};
use crate::features::CapabilitySet;
use crate::parsers;
use crate::state::{DeviceState, StateChange};
use crate::subscription::{StateReceiver, StateUpdate};
use crate::types::{StateField, UniqueId};

/// Where a coordinator is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Subscribed,
    TornDown,
}

/// State shared with the bus handlers
struct Shared {
    unique_id: UniqueId,
    config: Arc<ValidatedConfig>,
    state: RwLock<DeviceState>,
    active: AtomicBool,
    update_tx: broadcast::Sender<StateUpdate>,
}

impl Shared {
    fn apply_payload(&self, field: StateField, payload: &str) -> Result<StateChange> {
        if !self.active.load(Ordering::Acquire) {
            return Err(BridgeError::InvalidState(format!(
                "{} is not receiving updates",
                self.unique_id
            )));
        }

        let change = parsers::parse(field, payload, &self.config.availability)?;

        // Notify under the write lock so observers see mutation order
        let mut state = self.state.write();
        state.apply(change.clone());
        // No observers is fine
        let _ = self.update_tx.send(StateUpdate {
            unique_id: self.unique_id.clone(),
            change: change.clone(),
        });
        drop(state);

        tracing::debug!("{}: {} updated", self.unique_id, field);
        Ok(change)
    }
}

/// Owner of one device's live state and state-topic subscriptions
pub struct Coordinator {
    bus: Arc<dyn MessageBus>,
    shared: Arc<Shared>,
    handles: Vec<SubscriptionGuard>,
    lifecycle: Lifecycle,
}

impl Coordinator {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        unique_id: impl Into<UniqueId>,
        config: Arc<ValidatedConfig>,
        update_capacity: usize,
    ) -> Self {
        let (update_tx, _) = broadcast::channel(update_capacity.max(1));
        Self {
            bus,
            shared: Arc::new(Shared {
                unique_id: unique_id.into(),
                config,
                state: RwLock::new(DeviceState::default()),
                active: AtomicBool::new(false),
                update_tx,
            }),
            handles: Vec::new(),
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.shared.unique_id
    }

    pub fn config(&self) -> &Arc<ValidatedConfig> {
        &self.shared.config
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.shared.config.capabilities()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Number of state topics currently held
    pub fn subscription_count(&self) -> usize {
        self.handles.len()
    }

    /// Subscribe every configured state topic
    ///
    /// Retained values the transport replays during subscription are applied
    /// like any other update. If one subscription fails, those already taken
    /// are released and the coordinator stays uninitialized.
    pub async fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Uninitialized {
            return Err(BridgeError::InvalidState(format!(
                "cannot start {} from {:?}",
                self.shared.unique_id, self.lifecycle
            )));
        }

        self.shared.active.store(true, Ordering::Release);

        let config = self.shared.config.clone();
        for (field, topic) in config.state_topics() {
            let shared = self.shared.clone();
            let handler: MessageHandler = Arc::new(move |message: Message| {
                if let Err(e) = shared.apply_payload(field, &message.payload) {
                    tracing::warn!(
                        "{}: ignoring payload on {}: {}",
                        shared.unique_id,
                        message.topic,
                        e
                    );
                }
            });

            match self.bus.subscribe(topic, handler).await {
                Ok(handle) => self
                    .handles
                    .push(SubscriptionGuard::new(self.bus.clone(), handle)),
                Err(e) => {
                    tracing::error!(
                        "{}: failed to subscribe to {}: {}",
                        self.shared.unique_id,
                        topic,
                        e
                    );
                    self.shared.active.store(false, Ordering::Release);
                    self.release_all().await;
                    return Err(e);
                }
            }
        }

        self.lifecycle = Lifecycle::Subscribed;
        tracing::info!(
            "{}: subscribed to {} state topics",
            self.shared.unique_id,
            self.handles.len()
        );
        Ok(())
    }

    /// Release every subscription
    ///
    /// Safe to call in any lifecycle state and more than once. Deliveries
    /// that race with shutdown are dropped.
    pub async fn shutdown(&mut self) {
        self.shared.active.store(false, Ordering::Release);
        let released = self.release_all().await;
        if self.lifecycle != Lifecycle::TornDown {
            tracing::info!(
                "{}: torn down, released {} subscriptions",
                self.shared.unique_id,
                released
            );
        }
        self.lifecycle = Lifecycle::TornDown;
    }

    async fn release_all(&mut self) -> usize {
        let handles = std::mem::take(&mut self.handles);
        let count = handles.len();
        for guard in handles {
            let filter = guard.filter().to_string();
            if let Err(e) = guard.release().await {
                tracing::warn!(
                    "{}: failed to unsubscribe from {}: {}",
                    self.shared.unique_id,
                    filter,
                    e
                );
            }
        }
        count
    }

    /// Feed a payload for `field` through the same path bus deliveries take
    pub fn apply_payload(&self, field: StateField, payload: &str) -> Result<StateChange> {
        self.shared.apply_payload(field, payload)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> DeviceState {
        self.shared.state.read().clone()
    }

    /// Read the current state without copying it
    pub fn with_state<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&self.shared.state.read())
    }

    /// Receive every accepted change from now on
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.shared.update_tx.subscribe())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::Release);
        if !self.handles.is_empty() {
            tracing::warn!(
                "{}: dropped without shutdown, releasing {} subscriptions in the background",
                self.shared.unique_id,
                self.handles.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, SubscriptionHandle};
    use crate::config::validate;
    use crate::types::PlaybackState;
    use futures_util::future::BoxFuture;
    use serde_json::json;

    fn config() -> Arc<ValidatedConfig> {
        Arc::new(
            validate(&json!({
                "name": "Living Room",
                "unique_id": "living_room",
                "state_topic": "living/state",
                "media_title_topic": "living/title",
                "media_artist_topic": "living/artist",
                "volume_level_topic": "living/volume",
                "availability_topic": "living/availability",
                "source_list_topic": "living/sources",
                "volume_set_topic": "living/volume/set"
            }))
            .unwrap(),
        )
    }

    async fn started(bus: &LocalBus) -> Coordinator {
        let mut coordinator =
            Coordinator::new(Arc::new(bus.clone()), "living_room", config(), 16);
        coordinator.start().await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn subscribes_only_configured_state_topics() {
        let bus = LocalBus::new();
        let coordinator = started(&bus).await;

        assert_eq!(coordinator.lifecycle(), Lifecycle::Subscribed);
        assert_eq!(coordinator.subscription_count(), 6);
        assert_eq!(bus.subscription_count(), 6);
        assert!(bus.is_subscribed("living/volume"));
        assert!(!bus.is_subscribed("living/volume/set"));
    }

    #[tokio::test]
    async fn retained_values_apply_on_start() {
        let bus = LocalBus::new();
        bus.publish_retained("living/state", "playing");
        bus.publish_retained("living/title", "  Blue in Green ");

        let coordinator = started(&bus).await;
        let state = coordinator.snapshot();
        assert_eq!(state.state, Some(PlaybackState::Playing));
        assert_eq!(state.media_title.as_deref(), Some("Blue in Green"));
    }

    #[tokio::test]
    async fn rejected_payload_leaves_other_fields_alone() {
        let bus = LocalBus::new();
        let coordinator = started(&bus).await;

        bus.inject("living/title", "So What");
        bus.inject("living/artist", "Miles Davis");
        bus.inject("living/volume", "0.5");
        let before = coordinator.snapshot();

        bus.inject("living/volume", "1.2");
        bus.inject("living/volume", "loud");
        bus.inject("living/sources", "Spotify");

        assert_eq!(coordinator.snapshot(), before);
        assert_eq!(before.volume_level, Some(0.5));
    }

    #[tokio::test]
    async fn availability_requires_exact_token() {
        let bus = LocalBus::new();
        let coordinator = started(&bus).await;

        bus.inject("living/availability", "online");
        assert_eq!(coordinator.snapshot().available, Some(true));

        bus.inject("living/availability", "ONLINE");
        bus.inject("living/availability", "gone");
        assert_eq!(coordinator.snapshot().available, Some(true));

        bus.inject("living/availability", "offline");
        bus.inject("living/state", "playing");
        assert_eq!(
            coordinator.with_state(|s| s.effective_state()),
            Some(PlaybackState::Off)
        );
    }

    #[tokio::test]
    async fn accepted_changes_are_broadcast() {
        let bus = LocalBus::new();
        let coordinator = started(&bus).await;
        let mut updates = coordinator.subscribe();

        bus.inject("living/volume", "2.0");
        bus.inject("living/sources", r#"["Spotify","Radio"]"#);

        let update = updates.try_recv().unwrap().unwrap();
        assert_eq!(update.unique_id, "living_room");
        assert_eq!(
            update.change,
            StateChange::SourceList(vec!["Spotify".into(), "Radio".into()])
        );
        assert!(updates.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let bus = LocalBus::new();
        let mut coordinator = started(&bus).await;

        assert!(matches!(
            coordinator.start().await,
            Err(BridgeError::InvalidState(_))
        ));
        assert_eq!(bus.subscription_count(), 6);
    }

    #[tokio::test]
    async fn shutdown_releases_and_is_idempotent() {
        let bus = LocalBus::new();
        let mut coordinator = started(&bus).await;
        bus.inject("living/title", "Freddie Freeloader");

        coordinator.shutdown().await;
        coordinator.shutdown().await;

        assert_eq!(coordinator.lifecycle(), Lifecycle::TornDown);
        assert_eq!(bus.subscription_count(), 0);
        assert!(coordinator.apply_payload(StateField::MediaTitle, "late").is_err());
        assert_eq!(
            coordinator.snapshot().media_title.as_deref(),
            Some("Freddie Freeloader")
        );
        assert!(coordinator.start().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_without_start() {
        let bus = LocalBus::new();
        let mut coordinator = Coordinator::new(Arc::new(bus.clone()), "tv", config(), 4);
        coordinator.shutdown().await;
        assert_eq!(coordinator.lifecycle(), Lifecycle::TornDown);
    }

    #[tokio::test]
    async fn dropping_without_shutdown_releases_subscriptions() {
        let bus = LocalBus::new();
        let coordinator = started(&bus).await;
        assert_eq!(bus.subscription_count(), 6);

        drop(coordinator);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn updates_arrive_in_mutation_order() {
        let bus = LocalBus::new();
        let coordinator = Arc::new(started(&bus).await);
        let mut updates = coordinator.subscribe();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::task::spawn_blocking(move || {
                    let title = format!("Track {}", i);
                    coordinator
                        .apply_payload(StateField::MediaTitle, &title)
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = None;
        while let Some(update) = updates.try_recv().unwrap() {
            last = Some(update.change);
        }
        assert_eq!(
            last,
            Some(StateChange::MediaTitle(coordinator.snapshot().media_title))
        );
    }

    /// Refuses subscriptions after a fixed number have succeeded
    struct FlakyBus {
        inner: LocalBus,
        allowed: usize,
    }

    impl MessageBus for FlakyBus {
        fn subscribe<'a>(
            &'a self,
            filter: &'a str,
            handler: MessageHandler,
        ) -> BoxFuture<'a, Result<SubscriptionHandle>> {
            Box::pin(async move {
                if self.inner.subscription_count() >= self.allowed {
                    return Err(BridgeError::ConnectionClosed);
                }
                self.inner.subscribe(filter, handler).await
            })
        }

        fn unsubscribe(&self, handle: SubscriptionHandle) -> BoxFuture<'_, Result<()>> {
            self.inner.unsubscribe(handle)
        }

        fn publish<'a>(&'a self, topic: &'a str, payload: String) -> BoxFuture<'a, Result<()>> {
            self.inner.publish(topic, payload)
        }
    }

    #[tokio::test]
    async fn failed_start_releases_acquired_subscriptions() {
        let inner = LocalBus::new();
        let bus = Arc::new(FlakyBus {
            inner: inner.clone(),
            allowed: 3,
        });
        let mut coordinator = Coordinator::new(bus, "living_room", config(), 4);

        assert!(matches!(
            coordinator.start().await,
            Err(BridgeError::ConnectionClosed)
        ));
        assert_eq!(coordinator.lifecycle(), Lifecycle::Uninitialized);
        assert_eq!(coordinator.subscription_count(), 0);
        assert_eq!(inner.subscription_count(), 0);
    }
}
