//! Publish/subscribe seam
//!
//! The bridge never talks to a broker directly. It goes through
//! [`MessageBus`], which the host implements over its own client
//! ([`crate::MqttBus`] covers `rumqttc`). [`LocalBus`] is an in-process
//! implementation with retained messages, used by tests and by hosts that
//! already own a message loop.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// A single delivery from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Callback invoked once per delivered message
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Proof of an active subscription
///
/// Not `Clone`: giving it back to [`MessageBus::unsubscribe`] consumes it, so
/// a subscription can only be released once.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: Uuid,
    filter: String,
}

impl SubscriptionHandle {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filter: filter.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Whether the transport currently reaches the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Publish/subscribe client consumed by the bridge
pub trait MessageBus: Send + Sync {
    /// Start delivering messages matching `filter` to `handler`
    fn subscribe<'a>(
        &'a self,
        filter: &'a str,
        handler: MessageHandler,
    ) -> BoxFuture<'a, Result<SubscriptionHandle>>;

    /// Stop a subscription
    fn unsubscribe(&self, handle: SubscriptionHandle) -> BoxFuture<'_, Result<()>>;

    /// Best-effort publish
    fn publish<'a>(&'a self, topic: &'a str, payload: String) -> BoxFuture<'a, Result<()>>;

    /// Watch the transport's connection state
    ///
    /// Buses that cannot report it return a channel whose sender is already
    /// gone; watchers then see no changes at all.
    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        watch::channel(ConnectionStatus::Connected).1
    }
}

/// Subscription released when dropped
///
/// [`SubscriptionGuard::release`] unsubscribes and reports the outcome. A
/// guard dropped without it, by a cancelled future or an owner that was
/// never shut down, hands the handle to a task on the current runtime.
pub struct SubscriptionGuard {
    bus: Arc<dyn MessageBus>,
    handle: Option<SubscriptionHandle>,
}

impl SubscriptionGuard {
    pub fn new(bus: Arc<dyn MessageBus>, handle: SubscriptionHandle) -> Self {
        Self {
            bus,
            handle: Some(handle),
        }
    }

    pub fn filter(&self) -> &str {
        self.handle.as_ref().map_or("", SubscriptionHandle::filter)
    }

    /// Unsubscribe now
    pub async fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.bus.unsubscribe(handle).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "No runtime to release subscription on {}, leaking it",
                handle.filter()
            );
            return;
        };

        let bus = self.bus.clone();
        runtime.spawn(async move {
            let filter = handle.filter().to_string();
            match bus.unsubscribe(handle).await {
                Ok(()) => tracing::debug!("Released dropped subscription on {}", filter),
                Err(e) => tracing::warn!("Failed to release {}: {}", filter, e),
            }
        });
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Route {
    filter: String,
    handler: MessageHandler,
}

#[derive(Default)]
struct LocalBusState {
    routes: BTreeMap<Uuid, Route>,
    retained: BTreeMap<String, String>,
    published: Vec<Message>,
    fail_publishes: bool,
}

/// In-process message bus
///
/// Handlers run synchronously on the publishing task. Retained messages are
/// replayed to new subscribers, like a broker would.
#[derive(Clone)]
pub struct LocalBus {
    state: Arc<Mutex<LocalBusState>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl Default for LocalBus {
    fn default() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connected);
        Self {
            state: Arc::default(),
            status: Arc::new(status),
        }
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` as the retained value of `topic` and deliver it
    pub fn publish_retained(&self, topic: &str, payload: impl Into<String>) {
        let payload = payload.into();
        self.state
            .lock()
            .retained
            .insert(topic.to_string(), payload.clone());
        self.deliver(Message::new(topic, payload));
    }

    /// Deliver a message to matching subscribers without recording it
    pub fn inject(&self, topic: &str, payload: impl Into<String>) {
        self.deliver(Message::new(topic, payload));
    }

    /// Every message sent through [`MessageBus::publish`], oldest first
    pub fn published(&self) -> Vec<Message> {
        self.state.lock().published.clone()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.state.lock().routes.len()
    }

    /// Whether any live subscription uses exactly this filter
    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.state
            .lock()
            .routes
            .values()
            .any(|route| route.filter == filter)
    }

    /// Make subsequent publishes fail
    pub fn set_fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    /// Report a connection change to watchers, keeping every route
    pub fn set_connection(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// Drop every subscription and report the connection lost, as a dead
    /// transport would
    pub fn disconnect(&self) {
        self.state.lock().routes.clear();
        self.set_connection(ConnectionStatus::Disconnected);
    }

    fn deliver(&self, message: Message) {
        // Handlers run outside the lock so they may publish or subscribe
        let handlers: Vec<MessageHandler> = self
            .state
            .lock()
            .routes
            .values()
            .filter(|route| topic_matches(&route.filter, &message.topic))
            .map(|route| route.handler.clone())
            .collect();

        for handler in handlers {
            handler(message.clone());
        }
    }
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LocalBus")
            .field("subscriptions", &state.routes.len())
            .field("retained", &state.retained.len())
            .field("published", &state.published.len())
            .finish()
    }
}

impl MessageBus for LocalBus {
    fn subscribe<'a>(
        &'a self,
        filter: &'a str,
        handler: MessageHandler,
    ) -> BoxFuture<'a, Result<SubscriptionHandle>> {
        Box::pin(async move {
            let handle = SubscriptionHandle::new(filter);
            let retained: Vec<Message> = {
                let mut state = self.state.lock();
                state.routes.insert(
                    handle.id(),
                    Route {
                        filter: filter.to_string(),
                        handler: handler.clone(),
                    },
                );
                state
                    .retained
                    .iter()
                    .filter(|(topic, _)| topic_matches(filter, topic))
                    .map(|(topic, payload)| Message::new(topic.clone(), payload.clone()))
                    .collect()
            };

            for message in retained {
                handler(message);
            }

            tracing::debug!("Subscribed to {}", filter);
            Ok(handle)
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.lock().routes.remove(&handle.id());
            tracing::debug!("Unsubscribed from {}", handle.filter());
            Ok(())
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock();
                if state.fail_publishes {
                    return Err(BridgeError::ConnectionClosed);
                }
                state.published.push(Message::new(topic, payload.clone()));
            }
            self.deliver(Message::new(topic, payload));
            Ok(())
        })
    }

    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector() -> (MessageHandler, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |msg| sink.lock().push(msg));
        (handler, seen)
    }

    #[test]
    fn matches_wildcards() {
        let filter = "homeassistant/media_player/+/config";
        assert!(topic_matches(filter, "homeassistant/media_player/tv/config"));
        assert!(!topic_matches(filter, "homeassistant/media_player/tv/state"));
        assert!(!topic_matches(filter, "homeassistant/media_player/config"));
        assert!(topic_matches("tv/#", "tv/a/b"));
        assert!(topic_matches("tv/state", "tv/state"));
        assert!(!topic_matches("tv/state", "tv/state/x"));
    }

    #[tokio::test]
    async fn retained_messages_replay_on_subscribe() {
        let bus = LocalBus::new();
        bus.publish_retained("tv/state", "playing");

        let (handler, seen) = collector();
        let handle = bus.subscribe("tv/+", handler).await.unwrap();

        assert_eq!(seen.lock().as_slice(), &[Message::new("tv/state", "playing")]);
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(handle).await.unwrap();
        bus.inject("tv/state", "paused");
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn publish_records_and_delivers() {
        let bus = LocalBus::new();
        let (handler, seen) = collector();
        let _handle = bus.subscribe("tv/cmd", handler).await.unwrap();

        bus.publish("tv/cmd", "Play".to_string()).await.unwrap();
        assert_eq!(bus.published(), vec![Message::new("tv/cmd", "Play")]);
        assert_eq!(seen.lock().len(), 1);

        bus.set_fail_publishes(true);
        assert!(bus.publish("tv/cmd", "Pause".to_string()).await.is_err());
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let bus = LocalBus::new();
        let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());

        let (handler, _) = collector();
        let handle = bus.subscribe("tv/state", handler).await.unwrap();
        let guard = SubscriptionGuard::new(shared.clone(), handle);
        assert_eq!(guard.filter(), "tv/state");
        drop(guard);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.subscription_count(), 0);

        let (handler, _) = collector();
        let handle = bus.subscribe("tv/state", handler).await.unwrap();
        SubscriptionGuard::new(shared, handle).release().await.unwrap();
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn connection_changes_reach_watchers() {
        let bus = LocalBus::new();
        let mut status = bus.connection();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Connected);

        let (handler, _) = collector();
        let _handle = bus.subscribe("tv/state", handler).await.unwrap();
        bus.set_connection(ConnectionStatus::Disconnected);

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);
        assert_eq!(bus.subscription_count(), 1);
    }
}
