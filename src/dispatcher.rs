use serde::Serialize;
use std::sync::Arc;

use crate::bus::MessageBus;
use crate::config::ValidatedConfig;
use crate::error::{BridgeError, Result};
use crate::features::Capability;
use crate::types::{CommandField, RepeatMode};

/// Volume levels are published with at most four decimals
const VOLUME_SCALE: f64 = 10_000.0;

/// Control request addressed to a device
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TurnOn,
    TurnOff,
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
    /// Position in seconds
    Seek(f64),
    /// Volume fraction in `[0, 1]`
    SetVolume(f64),
    Mute(bool),
    Shuffle(bool),
    Repeat(RepeatMode),
    SelectSource(String),
    SelectSoundMode(String),
    PlayMedia {
        media_type: String,
        media_id: String,
    },
    ClearPlaylist,
}

#[derive(Serialize)]
struct PlayMediaBody<'a> {
    media_type: &'a str,
    media_id: &'a str,
}

fn render_volume(level: f64) -> Result<String> {
    if !level.is_finite() {
        return Err(BridgeError::InvalidArgument(format!(
            "volume level {} is not a number",
            level
        )));
    }
    // Adding zero turns -0 into 0
    let level = (level.clamp(0.0, 1.0) * VOLUME_SCALE).round() / VOLUME_SCALE + 0.0;
    Ok(level.to_string())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

impl Command {
    /// Capability that gates this command
    pub fn capability(&self) -> Capability {
        match self {
            Command::TurnOn => Capability::TurnOn,
            Command::TurnOff => Capability::TurnOff,
            Command::Play => Capability::Play,
            Command::Pause => Capability::Pause,
            Command::Stop => Capability::Stop,
            Command::NextTrack => Capability::NextTrack,
            Command::PreviousTrack => Capability::PreviousTrack,
            Command::Seek(_) => Capability::Seek,
            Command::SetVolume(_) => Capability::VolumeSet,
            Command::Mute(_) => Capability::VolumeMute,
            Command::Shuffle(_) => Capability::ShuffleSet,
            Command::Repeat(_) => Capability::RepeatSet,
            Command::SelectSource(_) => Capability::SelectSource,
            Command::SelectSoundMode(_) => Capability::SelectSoundMode,
            Command::PlayMedia { .. } => Capability::PlayMedia,
            Command::ClearPlaylist => Capability::ClearPlaylist,
        }
    }

    /// Payload published for this command
    pub fn render(&self) -> Result<String> {
        let payload = match self {
            Command::TurnOn => "ON".to_string(),
            Command::TurnOff => "OFF".to_string(),
            Command::Play => "Play".to_string(),
            Command::Pause => "Pause".to_string(),
            Command::Stop => "Stop".to_string(),
            Command::NextTrack => "Next".to_string(),
            Command::PreviousTrack => "Previous".to_string(),
            // Whole seconds; negative positions clamp to the start
            Command::Seek(position) => format!("{}", position.max(0.0).trunc() as u64),
            Command::SetVolume(level) => render_volume(*level)?,
            Command::Mute(muted) => on_off(*muted).to_string(),
            Command::Shuffle(shuffle) => on_off(*shuffle).to_string(),
            Command::Repeat(mode) => mode.as_str().to_string(),
            Command::SelectSource(source) => source.clone(),
            Command::SelectSoundMode(mode) => mode.clone(),
            Command::PlayMedia {
                media_type,
                media_id,
            } => serde_json::to_string(&PlayMediaBody {
                media_type,
                media_id,
            })?,
            Command::ClearPlaylist => "Clear".to_string(),
        };
        Ok(payload)
    }
}

/// Result of a dispatch that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// One message went out
    Published { topic: String },

    /// The device has no topic for this command; nothing was sent
    NotConfigured,
}

/// Fire-and-forget command publisher for one device
#[derive(Clone)]
pub struct CommandDispatcher {
    bus: Arc<dyn MessageBus>,
    config: Arc<ValidatedConfig>,
}

impl CommandDispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, config: Arc<ValidatedConfig>) -> Self {
        Self { bus, config }
    }

    /// Publish `command` to its configured topic
    ///
    /// Commands the device did not advertise are a logged no-op. A failed
    /// publish is logged and returned; it is never retried.
    pub async fn dispatch(&self, command: Command) -> Result<DispatchOutcome> {
        let capability = command.capability();
        let topic = capability
            .command_field()
            .filter(|_| self.config.capabilities().contains(capability))
            .and_then(|field| self.config.command_topic(field));

        let Some(topic) = topic else {
            tracing::warn!("{} is not configured, not sending {:?}", capability, command);
            return Ok(DispatchOutcome::NotConfigured);
        };

        let payload = command.render()?;
        tracing::debug!("Sending {:?} to {}", command, topic);

        match self.bus.publish(topic, payload).await {
            Ok(()) => Ok(DispatchOutcome::Published {
                topic: topic.to_string(),
            }),
            Err(e) => {
                tracing::error!("Failed to publish {:?} to {}: {}", command, topic, e);
                Err(BridgeError::Dispatch {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Topic a command field publishes to, if configured
    pub fn topic(&self, field: CommandField) -> Option<&str> {
        self.config.command_topic(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, Message};
    use crate::config::validate;
    use serde_json::json;

    fn dispatcher(bus: &LocalBus) -> CommandDispatcher {
        let config = validate(&json!({
            "unique_id": "den",
            "play_topic": "den/play",
            "seek_topic": "den/seek",
            "volume_set_topic": "den/volume/set",
            "mute_topic": "den/mute",
            "repeat_set_topic": "den/repeat",
            "play_media_topic": "den/play_media"
        }))
        .unwrap();
        CommandDispatcher::new(Arc::new(bus.clone()), Arc::new(config))
    }

    #[tokio::test]
    async fn configured_command_publishes_once() {
        let bus = LocalBus::new();
        let outcome = dispatcher(&bus).dispatch(Command::Play).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Published {
                topic: "den/play".into()
            }
        );
        assert_eq!(bus.published(), vec![Message::new("den/play", "Play")]);
    }

    #[tokio::test]
    async fn unconfigured_command_is_a_no_op() {
        let bus = LocalBus::new();
        let dispatcher = dispatcher(&bus);

        for command in [Command::Pause, Command::TurnOff, Command::Shuffle(true)] {
            assert_eq!(
                dispatcher.dispatch(command).await.unwrap(),
                DispatchOutcome::NotConfigured
            );
        }
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn payloads_render_per_command() {
        let bus = LocalBus::new();
        let dispatcher = dispatcher(&bus);

        dispatcher.dispatch(Command::Seek(42.9)).await.unwrap();
        dispatcher.dispatch(Command::SetVolume(0.5)).await.unwrap();
        dispatcher.dispatch(Command::Mute(true)).await.unwrap();
        dispatcher.dispatch(Command::Repeat(RepeatMode::All)).await.unwrap();
        dispatcher
            .dispatch(Command::PlayMedia {
                media_type: "music".into(),
                media_id: "spotify:track:1".into(),
            })
            .await
            .unwrap();

        let payloads: Vec<String> = bus.published().into_iter().map(|m| m.payload).collect();
        assert_eq!(payloads[..4], ["42", "0.5", "ON", "all"]);

        let body: serde_json::Value = serde_json::from_str(&payloads[4]).unwrap();
        assert_eq!(
            body,
            json!({ "media_type": "music", "media_id": "spotify:track:1" })
        );
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let bus = LocalBus::new();
        bus.set_fail_publishes(true);

        match dispatcher(&bus).dispatch(Command::Play).await {
            Err(BridgeError::Dispatch { topic, .. }) => assert_eq!(topic, "den/play"),
            other => panic!("expected dispatch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn volume_is_clamped_rounded_and_finite() {
        let render = |level: f64| Command::SetVolume(level).render().unwrap();
        assert_eq!(render(0.7 + 0.1), "0.8");
        assert_eq!(render(0.123456), "0.1235");
        assert_eq!(render(1.7), "1");
        assert_eq!(render(-0.2), "0");
        assert_eq!(render(-0.0), "0");

        let bus = LocalBus::new();
        let dispatcher = dispatcher(&bus);
        for level in [f64::NAN, f64::INFINITY] {
            assert!(matches!(
                dispatcher.dispatch(Command::SetVolume(level)).await,
                Err(BridgeError::InvalidArgument(_))
            ));
        }
        assert!(bus.published().is_empty());
    }

    #[test]
    fn every_command_maps_to_a_publishing_capability() {
        let commands = [
            Command::TurnOn,
            Command::Stop,
            Command::NextTrack,
            Command::PreviousTrack,
            Command::SelectSource("HDMI".into()),
            Command::SelectSoundMode("Movie".into()),
            Command::ClearPlaylist,
        ];
        for command in commands {
            assert!(command.capability().command_field().is_some());
        }
        assert_eq!(Command::ClearPlaylist.render().unwrap(), "Clear");
        assert_eq!(Command::Seek(-3.0).render().unwrap(), "0");
    }
}
