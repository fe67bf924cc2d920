use std::time::Duration;

use crate::config::COMPONENT;

const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_UPDATE_CAPACITY: usize = 100;
const DEFAULT_VOLUME_STEP: f64 = 0.1;

/// Tunables shared by discovery, setup and the per-device coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOptions {
    /// First topic level of discovery documents
    pub discovery_prefix: String,

    /// Second topic level of discovery documents
    pub component: String,

    /// How long a discovery scan listens
    pub discovery_timeout: Duration,

    /// How long a manual setup waits for the device's config document
    pub fetch_timeout: Duration,

    /// Buffer size of each device's update broadcast
    pub update_capacity: usize,

    /// Volume change applied by a single volume up/down step
    pub volume_step: f64,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            component: COMPONENT.to_string(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
            volume_step: DEFAULT_VOLUME_STEP,
        }
    }
}

impl BridgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discovery_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.discovery_prefix = prefix.into();
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_update_capacity(mut self, capacity: usize) -> Self {
        self.update_capacity = capacity.max(1);
        self
    }

    pub fn with_volume_step(mut self, step: f64) -> Self {
        self.volume_step = step;
        self
    }

    /// Wildcard topic every device advertises under
    pub fn discovery_topic(&self) -> String {
        format!("{}/{}/+/config", self.discovery_prefix, self.component)
    }

    /// Config topic of one device
    pub fn config_topic(&self, device_id: &str) -> String {
        format!("{}/{}/{}/config", self.discovery_prefix, self.component, device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics() {
        let options = BridgeOptions::default();
        assert_eq!(options.discovery_topic(), "homeassistant/media_player/+/config");
        assert_eq!(
            options.config_topic("kitchen"),
            "homeassistant/media_player/kitchen/config"
        );
    }

    #[test]
    fn builder_overrides() {
        let options = BridgeOptions::new()
            .with_discovery_prefix("ha")
            .with_update_capacity(0)
            .with_discovery_timeout(Duration::from_millis(50));
        assert_eq!(options.discovery_topic(), "ha/media_player/+/config");
        assert_eq!(options.update_capacity, 1);
        assert_eq!(options.discovery_timeout, Duration::from_millis(50));
    }
}
