use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::ValidatedConfig;

/// Unique identity of a configured device
pub type UniqueId = String;

/// Default device manufacturer when the discovery document omits one
pub const DEFAULT_MANUFACTURER: &str = "MQTT Media Player";

/// Default device model when the discovery document omits one
pub const DEFAULT_MODEL: &str = "MQTT Media Player";

/// Default software version when the discovery document omits one
pub const DEFAULT_SW_VERSION: &str = "2.0.0";

/// Default payload announcing the device is reachable
pub const DEFAULT_PAYLOAD_AVAILABLE: &str = "online";

/// Default payload announcing the device went away
pub const DEFAULT_PAYLOAD_NOT_AVAILABLE: &str = "offline";

/// Observable attribute backed by a state topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateField {
    State,
    MediaTitle,
    MediaArtist,
    MediaAlbumName,
    MediaAlbumArtist,
    MediaTrack,
    MediaDuration,
    MediaPosition,
    MediaContentType,
    MediaImageUrl,
    MediaEpisode,
    MediaSeason,
    MediaSeriesTitle,
    MediaChannel,
    MediaPlaylist,
    VolumeLevel,
    IsVolumeMuted,
    Shuffle,
    Repeat,
    Source,
    SourceList,
    SoundMode,
    SoundModeList,
    AppId,
    AppName,
    GroupMembers,
    Availability,
}

impl StateField {
    pub const ALL: [StateField; 27] = [
        StateField::State,
        StateField::MediaTitle,
        StateField::MediaArtist,
        StateField::MediaAlbumName,
        StateField::MediaAlbumArtist,
        StateField::MediaTrack,
        StateField::MediaDuration,
        StateField::MediaPosition,
        StateField::MediaContentType,
        StateField::MediaImageUrl,
        StateField::MediaEpisode,
        StateField::MediaSeason,
        StateField::MediaSeriesTitle,
        StateField::MediaChannel,
        StateField::MediaPlaylist,
        StateField::VolumeLevel,
        StateField::IsVolumeMuted,
        StateField::Shuffle,
        StateField::Repeat,
        StateField::Source,
        StateField::SourceList,
        StateField::SoundMode,
        StateField::SoundModeList,
        StateField::AppId,
        StateField::AppName,
        StateField::GroupMembers,
        StateField::Availability,
    ];

    /// Configuration key holding this field's topic
    pub fn config_key(self) -> &'static str {
        match self {
            StateField::State => "state_topic",
            StateField::MediaTitle => "media_title_topic",
            StateField::MediaArtist => "media_artist_topic",
            StateField::MediaAlbumName => "media_album_name_topic",
            StateField::MediaAlbumArtist => "media_album_artist_topic",
            StateField::MediaTrack => "media_track_topic",
            StateField::MediaDuration => "media_duration_topic",
            StateField::MediaPosition => "media_position_topic",
            StateField::MediaContentType => "media_content_type_topic",
            StateField::MediaImageUrl => "media_image_url_topic",
            StateField::MediaEpisode => "media_episode_topic",
            StateField::MediaSeason => "media_season_topic",
            StateField::MediaSeriesTitle => "media_series_title_topic",
            StateField::MediaChannel => "media_channel_topic",
            StateField::MediaPlaylist => "media_playlist_topic",
            StateField::VolumeLevel => "volume_level_topic",
            StateField::IsVolumeMuted => "is_volume_muted_topic",
            StateField::Shuffle => "shuffle_topic",
            StateField::Repeat => "repeat_topic",
            StateField::Source => "source_topic",
            StateField::SourceList => "source_list_topic",
            StateField::SoundMode => "sound_mode_topic",
            StateField::SoundModeList => "sound_mode_list_topic",
            StateField::AppId => "app_id_topic",
            StateField::AppName => "app_name_topic",
            StateField::GroupMembers => "group_members_topic",
            StateField::Availability => "availability_topic",
        }
    }

    /// Name of the `DeviceState` field this topic feeds
    pub fn name(self) -> &'static str {
        match self {
            StateField::State => "state",
            StateField::MediaTitle => "media_title",
            StateField::MediaArtist => "media_artist",
            StateField::MediaAlbumName => "media_album_name",
            StateField::MediaAlbumArtist => "media_album_artist",
            StateField::MediaTrack => "media_track",
            StateField::MediaDuration => "media_duration",
            StateField::MediaPosition => "media_position",
            StateField::MediaContentType => "media_content_type",
            StateField::MediaImageUrl => "media_image_url",
            StateField::MediaEpisode => "media_episode",
            StateField::MediaSeason => "media_season",
            StateField::MediaSeriesTitle => "media_series_title",
            StateField::MediaChannel => "media_channel",
            StateField::MediaPlaylist => "media_playlist",
            StateField::VolumeLevel => "volume_level",
            StateField::IsVolumeMuted => "is_volume_muted",
            StateField::Shuffle => "shuffle",
            StateField::Repeat => "repeat",
            StateField::Source => "source",
            StateField::SourceList => "source_list",
            StateField::SoundMode => "sound_mode",
            StateField::SoundModeList => "sound_mode_list",
            StateField::AppId => "app_id",
            StateField::AppName => "app_name",
            StateField::GroupMembers => "group_members",
            StateField::Availability => "available",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.config_key() == key)
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Controllable operation backed by a command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandField {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    VolumeSet,
    Mute,
    ShuffleSet,
    RepeatSet,
    Seek,
    TurnOn,
    TurnOff,
    SelectSource,
    SelectSoundMode,
    PlayMedia,
    ClearPlaylist,
    BrowseMedia,
}

impl CommandField {
    pub const ALL: [CommandField; 17] = [
        CommandField::Play,
        CommandField::Pause,
        CommandField::Stop,
        CommandField::Next,
        CommandField::Previous,
        CommandField::VolumeSet,
        CommandField::Mute,
        CommandField::ShuffleSet,
        CommandField::RepeatSet,
        CommandField::Seek,
        CommandField::TurnOn,
        CommandField::TurnOff,
        CommandField::SelectSource,
        CommandField::SelectSoundMode,
        CommandField::PlayMedia,
        CommandField::ClearPlaylist,
        CommandField::BrowseMedia,
    ];

    /// Configuration key holding this command's topic
    pub fn config_key(self) -> &'static str {
        match self {
            CommandField::Play => "play_topic",
            CommandField::Pause => "pause_topic",
            CommandField::Stop => "stop_topic",
            CommandField::Next => "next_topic",
            CommandField::Previous => "previous_topic",
            CommandField::VolumeSet => "volume_set_topic",
            CommandField::Mute => "mute_topic",
            CommandField::ShuffleSet => "shuffle_set_topic",
            CommandField::RepeatSet => "repeat_set_topic",
            CommandField::Seek => "seek_topic",
            CommandField::TurnOn => "turn_on_topic",
            CommandField::TurnOff => "turn_off_topic",
            CommandField::SelectSource => "select_source_topic",
            CommandField::SelectSoundMode => "select_sound_mode_topic",
            CommandField::PlayMedia => "play_media_topic",
            CommandField::ClearPlaylist => "clear_playlist_topic",
            CommandField::BrowseMedia => "browse_media_topic",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.config_key() == key)
    }
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Playback status reported on the state topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Idle,
    Off,
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Idle => "idle",
            PlaybackState::Off => "off",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "playing" => Some(PlaybackState::Playing),
            "paused" => Some(PlaybackState::Paused),
            "stopped" => Some(PlaybackState::Stopped),
            "idle" => Some(PlaybackState::Idle),
            "off" => Some(PlaybackState::Off),
            _ => None,
        }
    }
}

/// Repeat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    Off,
    All,
    One,
}

impl RepeatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "all",
            RepeatMode::One => "one",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "off" => Some(RepeatMode::Off),
            "all" => Some(RepeatMode::All),
            "one" => Some(RepeatMode::One),
            _ => None,
        }
    }
}

/// Device descriptor from the discovery document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Custom registry identifiers; an explicit empty list means none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Vec<String>>,

    pub manufacturer: String,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub sw_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_url: Option<String>,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            identifiers: None,
            manufacturer: DEFAULT_MANUFACTURER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            name: None,
            sw_version: DEFAULT_SW_VERSION.to_string(),
            configuration_url: None,
        }
    }
}

/// Online/offline token pair for the availability topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityTokens {
    pub payload_available: String,
    pub payload_not_available: String,
}

impl Default for AvailabilityTokens {
    fn default() -> Self {
        Self {
            payload_available: DEFAULT_PAYLOAD_AVAILABLE.to_string(),
            payload_not_available: DEFAULT_PAYLOAD_NOT_AVAILABLE.to_string(),
        }
    }
}

/// A validated device seen on the discovery channel and not yet configured
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Topic segment the advertisement was published under
    pub device_id: String,

    /// Explicit `unique_id`, else `device_id`
    pub unique_id: UniqueId,

    /// Display name: the config's `name`, else `device_id`
    pub name: String,

    pub config: Arc<ValidatedConfig>,
}

impl DiscoveredDevice {
    pub(crate) fn new(device_id: impl Into<String>, config: ValidatedConfig) -> Self {
        let device_id = device_id.into();
        let unique_id = config
            .unique_id
            .clone()
            .unwrap_or_else(|| device_id.clone());
        let name = config.name.clone().unwrap_or_else(|| device_id.clone());
        Self {
            device_id,
            unique_id,
            name,
            config: Arc::new(config),
        }
    }

    /// Label offered to a user picking among discovered devices
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_keys_round_trip() {
        for field in StateField::ALL {
            assert_eq!(StateField::from_config_key(field.config_key()), Some(field));
        }
        for field in CommandField::ALL {
            assert_eq!(CommandField::from_config_key(field.config_key()), Some(field));
        }
        assert_eq!(StateField::from_config_key("play_topic"), None);
    }

    #[test]
    fn playback_tokens_are_lowercase_only() {
        assert_eq!(PlaybackState::from_token("paused"), Some(PlaybackState::Paused));
        assert_eq!(PlaybackState::from_token("Paused"), None);
        assert_eq!(RepeatMode::from_token("one"), Some(RepeatMode::One));
    }
}
