use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::coordinator::Coordinator;
use crate::dispatcher::{Command, CommandDispatcher, DispatchOutcome};
use crate::error::{BridgeError, Result};
use crate::features::{Capability, CapabilitySet};
use crate::options::BridgeOptions;
use crate::setup::DeviceEntry;
use crate::state::DeviceState;
use crate::subscription::StateReceiver;
use crate::types::{PlaybackState, RepeatMode};

/// Where the current artwork can be obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// A `data:` URL carried in the state topic
    Inline {
        content_type: String,
        /// Whether `data` is base64 encoded
        base64: bool,
        data: String,
    },

    /// An http(s) URL the host has to fetch
    Remote(String),
}

/// Device registry information presented to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: String,
    pub configuration_url: Option<String>,
}

/// Handle for one configured media player
///
/// Pairs the device's [`Coordinator`] with its [`CommandDispatcher`]. Every
/// command method is gated by the same capability set the device advertises
/// through [`MediaPlayer::supported_features`].
///
/// # Example
///
/// ```no_run
/// use mqtt_media_player::{BridgeOptions, DeviceRegistry, MediaPlayer, MqttBus, SetupFlow};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = Arc::new(MqttBus::connect("bridge", "localhost", 1883));
///     let options = BridgeOptions::default();
///     let flow = SetupFlow::new(bus.clone(), options.clone());
///     let mut registry = DeviceRegistry::new();
///
///     let entry = flow.manual(&mut registry, "living_room").await?;
///     let mut player = MediaPlayer::setup(bus, entry, options).await?;
///     player.play().await?;
///     player.teardown().await;
///     Ok(())
/// }
/// ```
pub struct MediaPlayer {
    entry: DeviceEntry,
    coordinator: Coordinator,
    dispatcher: CommandDispatcher,
    options: BridgeOptions,
}

impl MediaPlayer {
    /// Build the coordinator and dispatcher for `entry` and start receiving
    /// state
    pub async fn setup(
        bus: Arc<dyn MessageBus>,
        entry: DeviceEntry,
        options: BridgeOptions,
    ) -> Result<Self> {
        tracing::info!("Setting up media player {}", entry.title);

        let mut coordinator = Coordinator::new(
            bus.clone(),
            entry.unique_id.clone(),
            entry.config.clone(),
            options.update_capacity,
        );
        coordinator.start().await?;

        let dispatcher = CommandDispatcher::new(bus, entry.config.clone());
        tracing::debug!(
            "Supported features for {}: {:?}",
            entry.unique_id,
            entry.config.capabilities()
        );

        Ok(Self {
            entry,
            coordinator,
            dispatcher,
            options,
        })
    }

    /// Release every subscription; the handle keeps its last state
    pub async fn teardown(&mut self) {
        tracing::info!("Unloading media player {}", self.entry.title);
        self.coordinator.shutdown().await;
    }

    pub fn unique_id(&self) -> &str {
        &self.entry.unique_id
    }

    pub fn title(&self) -> &str {
        &self.entry.title
    }

    pub fn entry(&self) -> &DeviceEntry {
        &self.entry
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn supported_features(&self) -> CapabilitySet {
        self.entry.config.capabilities()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.supported_features().contains(capability)
    }

    /// Playback state, `Off` while the device reports itself unavailable
    pub fn effective_state(&self) -> Option<PlaybackState> {
        self.coordinator.with_state(DeviceState::effective_state)
    }

    pub fn snapshot(&self) -> DeviceState {
        self.coordinator.snapshot()
    }

    pub fn subscribe(&self) -> StateReceiver {
        self.coordinator.subscribe()
    }

    pub fn available(&self) -> Option<bool> {
        self.coordinator.with_state(|s| s.available)
    }

    pub fn volume_level(&self) -> Option<f64> {
        self.coordinator.with_state(|s| s.volume_level)
    }

    pub fn is_volume_muted(&self) -> Option<bool> {
        self.coordinator.with_state(|s| s.is_volume_muted)
    }

    pub fn media_title(&self) -> Option<String> {
        self.coordinator.with_state(|s| s.media_title.clone())
    }

    /// Content id of the current media; devices do not publish one, so the
    /// title stands in for it
    pub fn media_content_id(&self) -> Option<String> {
        self.media_title()
    }

    pub fn media_artist(&self) -> Option<String> {
        self.coordinator.with_state(|s| s.media_artist.clone())
    }

    pub fn source(&self) -> Option<String> {
        self.coordinator.with_state(|s| s.source.clone())
    }

    pub fn source_list(&self) -> Option<Vec<String>> {
        self.coordinator.with_state(|s| s.source_list.clone())
    }

    // ========== Commands ==========

    /// Send any command through the capability gate
    pub async fn send(&self, command: Command) -> Result<DispatchOutcome> {
        self.dispatcher.dispatch(command).await
    }

    pub async fn turn_on(&self) -> Result<DispatchOutcome> {
        self.send(Command::TurnOn).await
    }

    pub async fn turn_off(&self) -> Result<DispatchOutcome> {
        self.send(Command::TurnOff).await
    }

    pub async fn play(&self) -> Result<DispatchOutcome> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<DispatchOutcome> {
        self.send(Command::Pause).await
    }

    pub async fn stop(&self) -> Result<DispatchOutcome> {
        self.send(Command::Stop).await
    }

    pub async fn next_track(&self) -> Result<DispatchOutcome> {
        self.send(Command::NextTrack).await
    }

    pub async fn previous_track(&self) -> Result<DispatchOutcome> {
        self.send(Command::PreviousTrack).await
    }

    /// Seek to `position` seconds
    pub async fn seek(&self, position: f64) -> Result<DispatchOutcome> {
        self.send(Command::Seek(position)).await
    }

    pub async fn set_volume(&self, level: f64) -> Result<DispatchOutcome> {
        self.send(Command::SetVolume(level)).await
    }

    pub async fn mute(&self, muted: bool) -> Result<DispatchOutcome> {
        self.send(Command::Mute(muted)).await
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> Result<DispatchOutcome> {
        self.send(Command::Shuffle(shuffle)).await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<DispatchOutcome> {
        self.send(Command::Repeat(mode)).await
    }

    pub async fn select_source(&self, source: &str) -> Result<DispatchOutcome> {
        self.send(Command::SelectSource(source.to_string())).await
    }

    pub async fn select_sound_mode(&self, mode: &str) -> Result<DispatchOutcome> {
        self.send(Command::SelectSoundMode(mode.to_string())).await
    }

    pub async fn play_media(&self, media_type: &str, media_id: &str) -> Result<DispatchOutcome> {
        self.send(Command::PlayMedia {
            media_type: media_type.to_string(),
            media_id: media_id.to_string(),
        })
        .await
    }

    pub async fn clear_playlist(&self) -> Result<DispatchOutcome> {
        self.send(Command::ClearPlaylist).await
    }

    /// Raise the volume by one step
    pub async fn volume_up(&self) -> Result<DispatchOutcome> {
        self.step_volume(self.options.volume_step).await
    }

    /// Lower the volume by one step
    pub async fn volume_down(&self) -> Result<DispatchOutcome> {
        self.step_volume(-self.options.volume_step).await
    }

    async fn step_volume(&self, delta: f64) -> Result<DispatchOutcome> {
        if !self.supports(Capability::VolumeStep) {
            tracing::warn!("{} does not support volume steps", self.entry.unique_id);
            return Ok(DispatchOutcome::NotConfigured);
        }

        let current = self.volume_level().ok_or_else(|| {
            BridgeError::InvalidState(format!(
                "volume of {} is not known yet",
                self.entry.unique_id
            ))
        })?;

        let level = (current + delta).clamp(0.0, 1.0);
        self.send(Command::SetVolume(level)).await
    }

    // ========== Presentation ==========

    /// Classify the current artwork for the host's image fetcher
    pub fn media_image(&self) -> Option<ImageRef> {
        let url = self.coordinator.with_state(|s| s.media_image_url.clone())?;
        classify_image(&url)
    }

    /// Short stable key for the current artwork URL, for image caches
    pub fn media_image_hash(&self) -> Option<String> {
        self.coordinator
            .with_state(|s| s.media_image_url.as_deref().map(image_hash))
    }

    /// False for http(s) artwork, which the host should proxy
    pub fn image_remotely_accessible(&self) -> bool {
        self.coordinator.with_state(|s| match &s.media_image_url {
            Some(url) => !is_http(url),
            None => true,
        })
    }

    pub fn device_info(&self) -> DeviceInfo {
        let device = &self.entry.config.device;
        let identifiers = device
            .identifiers
            .clone()
            .unwrap_or_else(|| vec![self.entry.unique_id.clone()]);

        DeviceInfo {
            identifiers,
            name: self.entry.title.clone(),
            manufacturer: device.manufacturer.clone(),
            model: device.model.clone(),
            sw_version: device.sw_version.clone(),
            configuration_url: device.configuration_url.clone(),
        }
    }
}

fn image_hash(url: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes());
    digest.simple().to_string()[..8].to_string()
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn classify_image(url: &str) -> Option<ImageRef> {
    if let Some(rest) = url.strip_prefix("data:") {
        if !rest.starts_with("image/") {
            return None;
        }
        let Some((header, data)) = rest.split_once(',') else {
            tracing::warn!("Inline image without data");
            return None;
        };
        let mut parts = header.split(';');
        let content_type = parts.next().unwrap_or_default().to_string();
        let base64 = parts.any(|p| p == "base64");
        return Some(ImageRef::Inline {
            content_type,
            base64,
            data: data.to_string(),
        });
    }

    if is_http(url) {
        return Some(ImageRef::Remote(url.to_string()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, Message};
    use crate::config::validate;
    use serde_json::json;

    fn entry(doc: serde_json::Value) -> DeviceEntry {
        let config = Arc::new(validate(&doc).unwrap());
        DeviceEntry {
            title: "Bedroom".into(),
            unique_id: "bedroom".into(),
            device_id: "bedroom".into(),
            config,
        }
    }

    async fn player(bus: &LocalBus) -> MediaPlayer {
        let entry = entry(json!({
            "unique_id": "bedroom",
            "state_topic": "bedroom/state",
            "availability_topic": "bedroom/availability",
            "volume_level_topic": "bedroom/volume",
            "media_image_url_topic": "bedroom/image",
            "volume_set_topic": "bedroom/volume/set",
            "play_topic": "bedroom/play"
        }));
        MediaPlayer::setup(Arc::new(bus.clone()), entry, BridgeOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn volume_steps_clamp() {
        let bus = LocalBus::new();
        let player = player(&bus).await;

        assert!(matches!(
            player.volume_up().await,
            Err(BridgeError::InvalidState(_))
        ));

        bus.inject("bedroom/volume", "0.95");
        player.volume_up().await.unwrap();
        bus.inject("bedroom/volume", "0.05");
        player.volume_down().await.unwrap();

        assert_eq!(
            bus.published(),
            vec![
                Message::new("bedroom/volume/set", "1"),
                Message::new("bedroom/volume/set", "0"),
            ]
        );
    }

    #[tokio::test]
    async fn commands_follow_features() {
        let bus = LocalBus::new();
        let player = player(&bus).await;

        assert!(player.supports(Capability::Play));
        assert!(player.supports(Capability::VolumeStep));
        assert!(!player.supports(Capability::Pause));

        assert_eq!(player.pause().await.unwrap(), DispatchOutcome::NotConfigured);
        assert!(matches!(
            player.play().await.unwrap(),
            DispatchOutcome::Published { .. }
        ));
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn offline_reports_off_and_teardown_releases() {
        let bus = LocalBus::new();
        let mut player = player(&bus).await;

        bus.inject("bedroom/state", "paused");
        assert_eq!(player.effective_state(), Some(PlaybackState::Paused));
        bus.inject("bedroom/availability", "offline");
        assert_eq!(player.effective_state(), Some(PlaybackState::Off));

        player.teardown().await;
        assert_eq!(bus.subscription_count(), 0);
        bus.inject("bedroom/availability", "online");
        assert_eq!(player.available(), Some(false));
    }

    #[tokio::test]
    async fn artwork_classification() {
        let bus = LocalBus::new();
        let player = player(&bus).await;
        assert_eq!(player.media_image(), None);
        assert!(player.image_remotely_accessible());

        bus.inject("bedroom/image", "https://example.com/cover.jpg");
        assert_eq!(
            player.media_image(),
            Some(ImageRef::Remote("https://example.com/cover.jpg".into()))
        );
        assert!(!player.image_remotely_accessible());

        bus.inject("bedroom/image", "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(
            player.media_image(),
            Some(ImageRef::Inline {
                content_type: "image/png".into(),
                base64: true,
                data: "iVBORw0KGgo=".into(),
            })
        );

        bus.inject("bedroom/image", "file:///tmp/cover.jpg");
        assert_eq!(player.media_image(), None);
    }

    #[tokio::test]
    async fn device_info_defaults_to_unique_id() {
        let bus = LocalBus::new();
        let player = player(&bus).await;
        let info = player.device_info();
        assert_eq!(info.identifiers, vec!["bedroom".to_string()]);
        assert_eq!(info.manufacturer, "MQTT Media Player");
        assert_eq!(info.sw_version, "2.0.0");

        let custom = MediaPlayer::setup(
            Arc::new(bus.clone()),
            entry(json!({ "device": { "identifiers": ["abc"], "model": "X1" } })),
            BridgeOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(custom.device_info().identifiers, vec!["abc".to_string()]);
        assert_eq!(custom.device_info().model, "X1");

        let anonymous = MediaPlayer::setup(
            Arc::new(bus.clone()),
            entry(json!({ "device": { "identifiers": [] } })),
            BridgeOptions::default(),
        )
        .await
        .unwrap();
        assert!(anonymous.device_info().identifiers.is_empty());
    }

    #[tokio::test]
    async fn content_id_and_image_hash() {
        let bus = LocalBus::new();
        let player = player(&bus).await;
        assert_eq!(player.media_image_hash(), None);

        bus.inject("bedroom/image", "https://example.com/a.jpg");
        let first = player.media_image_hash().unwrap();
        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(player.media_image_hash(), Some(first.clone()));

        bus.inject("bedroom/image", "https://example.com/b.jpg");
        assert_ne!(player.media_image_hash(), Some(first));

        let titled = MediaPlayer::setup(
            Arc::new(bus.clone()),
            entry(json!({ "media_title_topic": "bedroom/title" })),
            BridgeOptions::default(),
        )
        .await
        .unwrap();
        bus.inject("bedroom/title", "Naima");
        assert_eq!(titled.media_content_id().as_deref(), Some("Naima"));
    }

    #[tokio::test]
    async fn volume_step_publishes_rounded_level() {
        let bus = LocalBus::new();
        let player = player(&bus).await;

        bus.inject("bedroom/volume", "0.7");
        player.volume_up().await.unwrap();
        assert_eq!(bus.published(), vec![Message::new("bedroom/volume/set", "0.8")]);
    }

    #[tokio::test]
    async fn dropped_player_releases_subscriptions() {
        let bus = LocalBus::new();
        let player = player(&bus).await;
        assert_eq!(bus.subscription_count(), 4);

        drop(player);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(bus.subscription_count(), 0);
    }
}
