//! Device onboarding
//!
//! Three ways a device gets configured: picked from a discovery scan,
//! entered by name, or pushed by the host when an advertisement arrives.
//! All three end in a [`DeviceEntry`] accepted by the [`DeviceRegistry`],
//! which refuses a second device with the same unique id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::bus::MessageBus;
use crate::config::{self, ValidatedConfig};
use crate::discovery::DiscoveryScanner;
use crate::error::{BridgeError, Result};
use crate::options::BridgeOptions;
use crate::types::{DiscoveredDevice, UniqueId};

/// Form field that setup errors not tied to an input are reported on
pub const BASE_FIELD: &str = "base";

/// Form field holding the device name in manual setup
pub const NAME_FIELD: &str = "name";

/// An accepted device
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    /// Display title: the config's name, else the device id
    pub title: String,
    pub unique_id: UniqueId,
    pub device_id: String,
    pub config: Arc<ValidatedConfig>,
}

impl From<DiscoveredDevice> for DeviceEntry {
    fn from(device: DiscoveredDevice) -> Self {
        Self {
            title: device.name,
            unique_id: device.unique_id,
            device_id: device.device_id,
            config: device.config,
        }
    }
}

/// Why a setup step was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupReason {
    InvalidDeviceName,
    DeviceNotFound,
    InvalidConfig,
    AlreadyConfigured,
    Unknown,
    DiscoveryFailed,
    InvalidDiscoveryJson,
    InvalidDiscoveryConfig,
}

impl SetupReason {
    /// Stable code shown to the user
    pub fn code(self) -> &'static str {
        match self {
            SetupReason::InvalidDeviceName => "invalid_device_name",
            SetupReason::DeviceNotFound => "device_not_found",
            SetupReason::InvalidConfig => "invalid_config",
            SetupReason::AlreadyConfigured => "already_configured",
            SetupReason::Unknown => "unknown",
            SetupReason::DiscoveryFailed => "discovery_failed",
            SetupReason::InvalidDiscoveryJson => "invalid_discovery_json",
            SetupReason::InvalidDiscoveryConfig => "invalid_discovery_config",
        }
    }
}

impl fmt::Display for SetupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Setup failure attributed to one form field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct FormError {
    pub field: &'static str,
    pub reason: SetupReason,
}

impl FormError {
    pub fn new(field: &'static str, reason: SetupReason) -> Self {
        Self { field, reason }
    }

    fn base(reason: SetupReason) -> Self {
        Self::new(BASE_FIELD, reason)
    }
}

/// Result of a discovery step
#[derive(Debug, Clone)]
pub enum DiscoveryOutcome {
    Found(Vec<DiscoveredDevice>),
    /// Nothing new is advertising; offer manual setup
    NoDevices,
}

/// Configured devices keyed by unique id
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    entries: BTreeMap<UniqueId, DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.entries.contains_key(unique_id)
    }

    pub fn get(&self, unique_id: &str) -> Option<&DeviceEntry> {
        self.entries.get(unique_id)
    }

    /// Accept an entry unless its unique id is taken
    pub fn register(&mut self, entry: DeviceEntry) -> Result<()> {
        if self.contains(&entry.unique_id) {
            return Err(BridgeError::DuplicateIdentity(entry.unique_id));
        }
        tracing::info!("Registered {} as {}", entry.title, entry.unique_id);
        self.entries.insert(entry.unique_id.clone(), entry);
        Ok(())
    }

    pub fn remove(&mut self, unique_id: &str) -> Option<DeviceEntry> {
        self.entries.remove(unique_id)
    }

    pub fn configured_ids(&self) -> BTreeSet<UniqueId> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drives the onboarding steps against a bus
#[derive(Clone)]
pub struct SetupFlow {
    scanner: DiscoveryScanner,
    options: BridgeOptions,
}

impl SetupFlow {
    pub fn new(bus: Arc<dyn MessageBus>, options: BridgeOptions) -> Self {
        Self {
            scanner: DiscoveryScanner::new(bus, options.clone()),
            options,
        }
    }

    /// Scan for devices not yet in `registry`
    pub async fn discover(&self, registry: &DeviceRegistry) -> Result<DiscoveryOutcome> {
        let devices = self
            .scanner
            .scan(self.options.discovery_timeout, &registry.configured_ids())
            .await?;

        if devices.is_empty() {
            tracing::info!("No devices discovered, falling back to manual configuration");
            return Ok(DiscoveryOutcome::NoDevices);
        }
        Ok(DiscoveryOutcome::Found(devices))
    }

    /// [`SetupFlow::discover`], with a failed scan reported as a form error
    pub async fn discover_or_manual(
        &self,
        registry: &DeviceRegistry,
    ) -> std::result::Result<DiscoveryOutcome, FormError> {
        self.discover(registry).await.map_err(|e| {
            tracing::error!("Error during device discovery: {}", e);
            FormError::base(SetupReason::DiscoveryFailed)
        })
    }

    /// Accept a device the user picked
    pub fn confirm(
        &self,
        registry: &mut DeviceRegistry,
        device: DiscoveredDevice,
    ) -> std::result::Result<DeviceEntry, FormError> {
        accept(registry, device.into())
    }

    /// Configure a device by name, fetching its config document
    pub async fn manual(
        &self,
        registry: &mut DeviceRegistry,
        device_name: &str,
    ) -> std::result::Result<DeviceEntry, FormError> {
        if !is_valid_device_name(device_name) {
            return Err(FormError::new(NAME_FIELD, SetupReason::InvalidDeviceName));
        }

        let fetched = self
            .scanner
            .fetch_config(device_name, self.options.fetch_timeout)
            .await;

        match fetched {
            Ok(Some(device)) => accept(registry, device.into()),
            Ok(None) => Err(FormError::new(NAME_FIELD, SetupReason::DeviceNotFound)),
            Err(BridgeError::Schema(e)) => {
                tracing::error!("Invalid configuration for device {}: {}", device_name, e);
                Err(FormError::new(NAME_FIELD, SetupReason::InvalidConfig))
            }
            Err(e) => {
                tracing::error!("Error during manual configuration: {}", e);
                Err(FormError::base(SetupReason::Unknown))
            }
        }
    }

    /// Evaluate an advertisement the host received outside of a scan
    ///
    /// The returned device still has to be [confirmed](SetupFlow::confirm).
    pub fn from_discovery_message(
        &self,
        registry: &DeviceRegistry,
        topic: &str,
        payload: &str,
    ) -> std::result::Result<DiscoveredDevice, FormError> {
        let raw: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
            tracing::warn!("Invalid JSON in discovery message on {}: {}", topic, e);
            FormError::base(SetupReason::InvalidDiscoveryJson)
        })?;

        let device_id = topic
            .rsplit('/')
            .nth(1)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FormError::base(SetupReason::InvalidDiscoveryConfig))?;

        let config = config::validate(&raw).map_err(|e| {
            tracing::warn!("Invalid configuration for device {}: {}", device_id, e);
            FormError::base(SetupReason::InvalidDiscoveryConfig)
        })?;

        let device = DiscoveredDevice::new(device_id, config);
        if registry.contains(&device.unique_id) {
            return Err(FormError::base(SetupReason::AlreadyConfigured));
        }
        Ok(device)
    }
}

fn accept(
    registry: &mut DeviceRegistry,
    entry: DeviceEntry,
) -> std::result::Result<DeviceEntry, FormError> {
    match registry.register(entry.clone()) {
        Ok(()) => Ok(entry),
        Err(BridgeError::DuplicateIdentity(id)) => {
            tracing::warn!("{} is already configured", id);
            Err(FormError::base(SetupReason::AlreadyConfigured))
        }
        Err(e) => {
            tracing::error!("Failed to register {}: {}", entry.unique_id, e);
            Err(FormError::base(SetupReason::Unknown))
        }
    }
}

/// ASCII letters and digits, with `_` and `-` allowed as separators
pub fn is_valid_device_name(name: &str) -> bool {
    let mut stripped = name.chars().filter(|c| *c != '_' && *c != '-').peekable();
    stripped.peek().is_some() && stripped.all(|c| c.is_ascii_alphanumeric())
}
