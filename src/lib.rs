//! Rust library for bridging MQTT-controlled media players
//!
//! Devices announce themselves with a JSON configuration document on a
//! Home-Assistant-style discovery topic, publish their state on one topic per
//! field, and accept commands on one topic per operation. This library turns
//! that into:
//!
//! - A strictly validated, typed device configuration
//! - A capability set derived from the configured command topics
//! - Time-bounded discovery of advertising devices
//! - A per-device canonical state, updated one field at a time
//! - Capability-gated, fire-and-forget commands
//! - Real-time state update subscriptions
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_media_player::{
//!     BridgeOptions, DeviceRegistry, DiscoveryOutcome, MediaPlayer, MqttBus, SetupFlow,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(MqttBus::connect("media-bridge", "localhost", 1883));
//!     let options = BridgeOptions::default();
//!     let flow = SetupFlow::new(bus.clone(), options.clone());
//!     let mut registry = DeviceRegistry::new();
//!
//!     // Find devices advertising on the discovery topic
//!     if let DiscoveryOutcome::Found(devices) = flow.discover(&registry).await? {
//!         let entry = flow.confirm(&mut registry, devices[0].clone())?;
//!         let mut player = MediaPlayer::setup(bus.clone(), entry, options.clone()).await?;
//!
//!         player.play().await?;
//!
//!         // Watch state changes
//!         let mut updates = player.subscribe();
//!         while let Ok(update) = updates.recv().await {
//!             println!("State update: {:?}", update);
//!             break; // Just show one update
//!         }
//!
//!         player.teardown().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Bus**: the publish/subscribe seam ([`MessageBus`]), with an in-memory
//!   [`LocalBus`] and a `rumqttc` adapter [`MqttBus`]
//! - **Config**: schema validation and capability derivation
//! - **Discovery / Setup**: finding, validating and registering devices
//! - **Coordinator**: per-field parsers feeding the canonical device state
//! - **Dispatcher / Player**: command rendering and the per-device handle

mod bus;
pub mod config;
mod coordinator;
mod discovery;
mod dispatcher;
mod error;
pub mod features;
mod mqtt;
mod options;
pub mod parsers;
mod player;
mod setup;
mod state;
mod subscription;
mod types;

// Public exports
pub use bus::{
    topic_matches, ConnectionStatus, LocalBus, Message, MessageBus, MessageHandler,
    SubscriptionGuard, SubscriptionHandle,
};
pub use config::{validate, ValidatedConfig};
pub use coordinator::{Coordinator, Lifecycle};
pub use discovery::DiscoveryScanner;
pub use dispatcher::{Command, CommandDispatcher, DispatchOutcome};
pub use error::{BridgeError, ParseError, Result, SchemaError};
pub use features::{Capability, CapabilitySet};
pub use mqtt::MqttBus;
pub use options::BridgeOptions;
pub use player::{DeviceInfo, ImageRef, MediaPlayer};
pub use setup::{
    is_valid_device_name, DeviceEntry, DeviceRegistry, DiscoveryOutcome, FormError, SetupFlow,
    SetupReason,
};
pub use state::{DeviceState, StateChange};
pub use subscription::{StateReceiver, StateUpdate};
pub use types::{
    AvailabilityTokens, CommandField, DeviceDescriptor, DiscoveredDevice, PlaybackState,
    RepeatMode, StateField, UniqueId,
};
