use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::bus::{
    topic_matches, ConnectionStatus, Message, MessageBus, MessageHandler, SubscriptionHandle,
};
use crate::error::Result;

const REQUEST_CAPACITY: usize = 64;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Handlers keyed by subscription
type Routes = BTreeMap<Uuid, (String, MessageHandler)>;

/// [`MessageBus`] over a `rumqttc` client
///
/// Owns the client's event loop task. Reconnects and keep-alive are
/// whatever `rumqttc` does with the given options. The session is clean, so
/// every live filter is subscribed again after each `ConnAck`, and watchers
/// of [`MessageBus::connection`] see every loss.
pub struct MqttBus {
    client: AsyncClient,
    routes: Arc<Mutex<Routes>>,
    status: watch::Receiver<ConnectionStatus>,
    task_handle: tokio::task::JoinHandle<()>,
}

impl MqttBus {
    /// Create the client and start polling its event loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: MqttOptions) -> Self {
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let routes: Arc<Mutex<Routes>> = Arc::new(Mutex::new(BTreeMap::new()));
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);

        let routes_clone = routes.clone();
        let client_clone = client.clone();
        let task_handle = tokio::spawn(async move {
            run_event_loop(eventloop, client_clone, routes_clone, status_tx).await;
        });

        Self {
            client,
            routes,
            status,
            task_handle,
        }
    }

    /// Connect with a fresh client id to `host:port`
    pub fn connect(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        Self::new(options)
    }

    /// Underlying client, for hosts that publish their own messages
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.task_handle.abort();
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    routes: Arc<Mutex<Routes>>,
    status: watch::Sender<ConnectionStatus>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = Message::new(
                    publish.topic,
                    String::from_utf8_lossy(&publish.payload).into_owned(),
                );
                dispatch(&routes, message);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker");
                let restored = resubscribe(&client, &routes);
                if restored > 0 {
                    tracing::info!("Restored {} subscriptions", restored);
                }
                set_status(&status, ConnectionStatus::Connected);
            }
            Ok(_) => {}
            Err(e) => {
                // rumqttc reconnects on the next poll
                tracing::error!("MQTT connection error: {}", e);
                set_status(&status, ConnectionStatus::Disconnected);
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
            }
        }
    }
}

fn set_status(tx: &watch::Sender<ConnectionStatus>, status: ConnectionStatus) {
    tx.send_if_modified(|current| {
        let changed = *current != status;
        *current = status;
        changed
    });
}

/// Distinct broker-side filters behind the live routes
fn active_filters(routes: &Routes) -> BTreeSet<String> {
    routes.values().map(|(filter, _)| filter.clone()).collect()
}

/// Queue a subscribe for every live filter, returning how many were queued
///
/// Runs on the event loop task, so it must not wait for request capacity.
fn resubscribe(client: &AsyncClient, routes: &Mutex<Routes>) -> usize {
    let filters = active_filters(&routes.lock());
    let mut queued = 0;
    for filter in filters {
        match client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
            Ok(()) => queued += 1,
            Err(e) => tracing::error!("Failed to resubscribe to {}: {}", filter, e),
        }
    }
    queued
}

fn dispatch(routes: &Mutex<Routes>, message: Message) {
    tracing::trace!("Received on {}: {}", message.topic, message.payload);

    let handlers: Vec<MessageHandler> = routes
        .lock()
        .values()
        .filter(|(filter, _)| topic_matches(filter, &message.topic))
        .map(|(_, handler)| handler.clone())
        .collect();

    for handler in handlers {
        handler(message.clone());
    }
}

impl MessageBus for MqttBus {
    fn subscribe<'a>(
        &'a self,
        filter: &'a str,
        handler: MessageHandler,
    ) -> BoxFuture<'a, Result<SubscriptionHandle>> {
        Box::pin(async move {
            let handle = SubscriptionHandle::new(filter);
            self.routes
                .lock()
                .insert(handle.id(), (filter.to_string(), handler));

            if let Err(e) = self.client.subscribe(filter, QoS::AtMostOnce).await {
                self.routes.lock().remove(&handle.id());
                return Err(e.into());
            }

            tracing::debug!("Subscribed to {}", filter);
            Ok(handle)
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let still_routed = {
                let mut routes = self.routes.lock();
                routes.remove(&handle.id());
                routes.values().any(|(filter, _)| filter == handle.filter())
            };

            // Another subscriber may share the broker-side filter
            if !still_routed {
                self.client.unsubscribe(handle.filter()).await?;
            }

            tracing::debug!("Unsubscribed from {}", handle.filter());
            Ok(())
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::debug!("Publishing to {}: {}", topic, payload);
            self.client
                .publish(topic, QoS::AtMostOnce, false, payload.into_bytes())
                .await?;
            Ok(())
        })
    }

    fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        let mut status = self.status.clone();
        // Only changes from now on count
        status.borrow_and_update();
        status
    }
}
