use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::bus::{ConnectionStatus, Message, MessageBus, MessageHandler, SubscriptionGuard};
use crate::config;
use crate::error::{BridgeError, Result};
use crate::options::BridgeOptions;
use crate::types::{DiscoveredDevice, UniqueId};

/// Time-bounded scan of the discovery channel
///
/// Each call opens its own subscription, collects advertisements until the
/// deadline, releases the subscription and only then evaluates what it
/// collected. One malformed advertisement never affects the others.
///
/// # Example
///
/// ```no_run
/// use mqtt_media_player::{BridgeOptions, DiscoveryScanner, MqttBus};
/// use std::collections::BTreeSet;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = Arc::new(MqttBus::connect("bridge", "localhost", 1883));
///     let options = BridgeOptions::default();
///     let scanner = DiscoveryScanner::new(bus, options.clone());
///
///     for device in scanner.scan(options.discovery_timeout, &BTreeSet::new()).await? {
///         println!("Found {}", device.label());
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DiscoveryScanner {
    bus: Arc<dyn MessageBus>,
    options: BridgeOptions,
}

impl DiscoveryScanner {
    pub fn new(bus: Arc<dyn MessageBus>, options: BridgeOptions) -> Self {
        Self { bus, options }
    }

    /// Collect advertisements for `timeout` and return the valid, new ones
    ///
    /// Devices whose unique id is in `configured` are skipped. When two
    /// advertisements share a unique id the first one seen is kept. An empty
    /// result is not an error; a transport failure during the window is.
    pub async fn scan(
        &self,
        timeout: Duration,
        configured: &BTreeSet<UniqueId>,
    ) -> Result<Vec<DiscoveredDevice>> {
        let topic = self.options.discovery_topic();
        tracing::info!("Scanning {} for {:?}", topic, timeout);

        let messages = self.collect(&topic, timeout, None).await?;

        let mut seen: BTreeSet<UniqueId> = BTreeSet::new();
        let mut devices = Vec::new();
        for message in messages {
            let Some(device) = evaluate(&message) else {
                continue;
            };
            if configured.contains(&device.unique_id) {
                tracing::debug!("{} is already configured, skipping", device.unique_id);
                continue;
            }
            if !seen.insert(device.unique_id.clone()) {
                tracing::debug!(
                    "Duplicate advertisement for {} on {}, keeping the first",
                    device.unique_id,
                    message.topic
                );
                continue;
            }
            devices.push(device);
        }

        tracing::info!("Discovery complete, found {} devices", devices.len());
        Ok(devices)
    }

    /// Wait up to `wait` for one device's config document
    ///
    /// No message, or a message that is not JSON, yields `Ok(None)`. A JSON
    /// document that fails validation is an error.
    pub async fn fetch_config(
        &self,
        device_id: &str,
        wait: Duration,
    ) -> Result<Option<DiscoveredDevice>> {
        let topic = self.options.config_topic(device_id);
        tracing::debug!("Fetching config from {}", topic);

        let messages = self.collect(&topic, wait, Some(1)).await?;
        let Some(message) = messages.into_iter().next() else {
            tracing::warn!("No config received for {}", device_id);
            return Ok(None);
        };

        let raw: serde_json::Value = match serde_json::from_str(&message.payload) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Config for {} is not JSON: {}", device_id, e);
                return Ok(None);
            }
        };

        let config = config::validate(&raw).map_err(|e| {
            tracing::warn!("Invalid config for {}: {}", device_id, e);
            e
        })?;
        Ok(Some(DiscoveredDevice::new(device_id, config)))
    }

    /// Subscribe to `filter`, buffer deliveries until the deadline or until
    /// `limit` messages arrived, and release the subscription on every path,
    /// including cancellation
    async fn collect(
        &self,
        filter: &str,
        window: Duration,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |message: Message| {
            // Receiver is gone once the window closed
            let _ = tx.send(message);
        });

        let mut status = self.bus.connection();

        let deadline = Instant::now() + window;
        let handle = self.bus.subscribe(filter, handler).await.map_err(|e| {
            BridgeError::Discovery(format!("subscribe to {} failed: {}", filter, e))
        })?;
        let guard = SubscriptionGuard::new(self.bus.clone(), handle);

        let collected = collect_until(&mut rx, &mut status, deadline, limit).await;

        if let Err(e) = guard.release().await {
            tracing::warn!("Failed to release subscription on {}: {}", filter, e);
        }

        collected
    }
}

async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    status: &mut watch::Receiver<ConnectionStatus>,
    deadline: Instant,
    limit: Option<usize>,
) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    let mut watching = true;
    let window = tokio::time::sleep_until(deadline);
    tokio::pin!(window);

    loop {
        if limit.is_some_and(|limit| messages.len() >= limit) {
            return Ok(messages);
        }

        tokio::select! {
            _ = &mut window => return Ok(messages),
            message = rx.recv() => match message {
                Some(message) => messages.push(message),
                None => {
                    return Err(BridgeError::Discovery(
                        "subscription dropped by the message bus".to_string(),
                    ))
                }
            },
            changed = status.changed(), if watching => match changed {
                Ok(()) => {
                    let now = *status.borrow_and_update();
                    if now == ConnectionStatus::Disconnected {
                        return Err(BridgeError::Discovery(
                            "connection to the broker was lost".to_string(),
                        ));
                    }
                }
                // The bus does not report its connection
                Err(_) => watching = false,
            },
        }
    }
}

/// Turn one advertisement into a candidate, or log why it was discarded
fn evaluate(message: &Message) -> Option<DiscoveredDevice> {
    let device_id = match message.topic.rsplit('/').nth(1) {
        Some(id) if !id.is_empty() => id,
        _ => {
            tracing::warn!("No device id in discovery topic {}", message.topic);
            return None;
        }
    };

    let raw: serde_json::Value = match serde_json::from_str(&message.payload) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Discarding {}: invalid JSON: {}", device_id, e);
            return None;
        }
    };

    match config::validate(&raw) {
        Ok(config) => Some(DiscoveredDevice::new(device_id, config)),
        Err(e) => {
            tracing::warn!("Discarding {}: {}", device_id, e);
            None
        }
    }
}
