use serde::Serialize;

use crate::types::{PlaybackState, RepeatMode, StateField};

/// Canonical live snapshot of one device
///
/// Every field starts out unknown (`None`) and is replaced independently
/// through [`DeviceState::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    // Core state
    pub state: Option<PlaybackState>,
    pub available: Option<bool>,

    // Media information
    pub media_title: Option<String>,
    pub media_artist: Option<String>,
    pub media_album_name: Option<String>,
    pub media_album_artist: Option<String>,
    pub media_track: Option<u32>,
    pub media_duration: Option<u64>,
    pub media_position: Option<u64>,
    pub media_content_type: Option<String>,
    pub media_image_url: Option<String>,
    pub media_episode: Option<String>,
    pub media_season: Option<String>,
    pub media_series_title: Option<String>,
    pub media_channel: Option<String>,
    pub media_playlist: Option<String>,

    // Audio properties
    pub volume_level: Option<f64>,
    pub is_volume_muted: Option<bool>,

    // Playback modifiers
    pub shuffle: Option<bool>,
    pub repeat: Option<RepeatMode>,

    // Source and sound mode
    pub source: Option<String>,
    pub source_list: Option<Vec<String>>,
    pub sound_mode: Option<String>,
    pub sound_mode_list: Option<Vec<String>>,

    // Running application
    pub app_id: Option<String>,
    pub app_name: Option<String>,

    pub group_members: Option<Vec<String>>,
}

/// A single accepted field replacement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum StateChange {
    State(PlaybackState),
    Available(bool),
    MediaTitle(Option<String>),
    MediaArtist(Option<String>),
    MediaAlbumName(Option<String>),
    MediaAlbumArtist(Option<String>),
    MediaTrack(Option<u32>),
    MediaDuration(Option<u64>),
    MediaPosition(Option<u64>),
    MediaContentType(String),
    MediaImageUrl(Option<String>),
    MediaEpisode(Option<String>),
    MediaSeason(Option<String>),
    MediaSeriesTitle(Option<String>),
    MediaChannel(Option<String>),
    MediaPlaylist(Option<String>),
    VolumeLevel(f64),
    IsVolumeMuted(bool),
    Shuffle(bool),
    Repeat(RepeatMode),
    Source(Option<String>),
    SourceList(Vec<String>),
    SoundMode(Option<String>),
    SoundModeList(Vec<String>),
    AppId(Option<String>),
    AppName(Option<String>),
    GroupMembers(Vec<String>),
}

impl StateChange {
    /// Field this change replaces
    pub fn field(&self) -> StateField {
        match self {
            StateChange::State(_) => StateField::State,
            StateChange::Available(_) => StateField::Availability,
            StateChange::MediaTitle(_) => StateField::MediaTitle,
            StateChange::MediaArtist(_) => StateField::MediaArtist,
            StateChange::MediaAlbumName(_) => StateField::MediaAlbumName,
            StateChange::MediaAlbumArtist(_) => StateField::MediaAlbumArtist,
            StateChange::MediaTrack(_) => StateField::MediaTrack,
            StateChange::MediaDuration(_) => StateField::MediaDuration,
            StateChange::MediaPosition(_) => StateField::MediaPosition,
            StateChange::MediaContentType(_) => StateField::MediaContentType,
            StateChange::MediaImageUrl(_) => StateField::MediaImageUrl,
            StateChange::MediaEpisode(_) => StateField::MediaEpisode,
            StateChange::MediaSeason(_) => StateField::MediaSeason,
            StateChange::MediaSeriesTitle(_) => StateField::MediaSeriesTitle,
            StateChange::MediaChannel(_) => StateField::MediaChannel,
            StateChange::MediaPlaylist(_) => StateField::MediaPlaylist,
            StateChange::VolumeLevel(_) => StateField::VolumeLevel,
            StateChange::IsVolumeMuted(_) => StateField::IsVolumeMuted,
            StateChange::Shuffle(_) => StateField::Shuffle,
            StateChange::Repeat(_) => StateField::Repeat,
            StateChange::Source(_) => StateField::Source,
            StateChange::SourceList(_) => StateField::SourceList,
            StateChange::SoundMode(_) => StateField::SoundMode,
            StateChange::SoundModeList(_) => StateField::SoundModeList,
            StateChange::AppId(_) => StateField::AppId,
            StateChange::AppName(_) => StateField::AppName,
            StateChange::GroupMembers(_) => StateField::GroupMembers,
        }
    }
}

impl DeviceState {
    /// Replace exactly the field named by `change`
    pub fn apply(&mut self, change: StateChange) {
        match change {
            StateChange::State(v) => self.state = Some(v),
            StateChange::Available(v) => self.available = Some(v),
            StateChange::MediaTitle(v) => self.media_title = v,
            StateChange::MediaArtist(v) => self.media_artist = v,
            StateChange::MediaAlbumName(v) => self.media_album_name = v,
            StateChange::MediaAlbumArtist(v) => self.media_album_artist = v,
            StateChange::MediaTrack(v) => self.media_track = v,
            StateChange::MediaDuration(v) => self.media_duration = v,
            StateChange::MediaPosition(v) => self.media_position = v,
            StateChange::MediaContentType(v) => self.media_content_type = Some(v),
            StateChange::MediaImageUrl(v) => self.media_image_url = v,
            StateChange::MediaEpisode(v) => self.media_episode = v,
            StateChange::MediaSeason(v) => self.media_season = v,
            StateChange::MediaSeriesTitle(v) => self.media_series_title = v,
            StateChange::MediaChannel(v) => self.media_channel = v,
            StateChange::MediaPlaylist(v) => self.media_playlist = v,
            StateChange::VolumeLevel(v) => self.volume_level = Some(v),
            StateChange::IsVolumeMuted(v) => self.is_volume_muted = Some(v),
            StateChange::Shuffle(v) => self.shuffle = Some(v),
            StateChange::Repeat(v) => self.repeat = Some(v),
            StateChange::Source(v) => self.source = v,
            StateChange::SourceList(v) => self.source_list = Some(v),
            StateChange::SoundMode(v) => self.sound_mode = v,
            StateChange::SoundModeList(v) => self.sound_mode_list = Some(v),
            StateChange::AppId(v) => self.app_id = v,
            StateChange::AppName(v) => self.app_name = v,
            StateChange::GroupMembers(v) => self.group_members = Some(v),
        }
    }

    /// Playback state as presented to the host
    ///
    /// A device that announced itself offline reports `Off` regardless of the
    /// last playback status it sent.
    pub fn effective_state(&self) -> Option<PlaybackState> {
        if self.available == Some(false) {
            return Some(PlaybackState::Off);
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown() {
        let state = DeviceState::default();
        assert_eq!(state.state, None);
        assert_eq!(state.available, None);
        assert_eq!(state.volume_level, None);
        assert_eq!(state.group_members, None);
    }

    #[test]
    fn apply_touches_one_field() {
        let mut state = DeviceState::default();
        state.apply(StateChange::MediaTitle(Some("Song".into())));
        state.apply(StateChange::VolumeLevel(0.25));

        let expected = DeviceState {
            media_title: Some("Song".into()),
            volume_level: Some(0.25),
            ..Default::default()
        };
        assert_eq!(state, expected);

        state.apply(StateChange::MediaTitle(None));
        assert_eq!(state.media_title, None);
        assert_eq!(state.volume_level, Some(0.25));
    }

    #[test]
    fn offline_device_reports_off() {
        let mut state = DeviceState::default();
        state.apply(StateChange::State(PlaybackState::Playing));
        assert_eq!(state.effective_state(), Some(PlaybackState::Playing));
        state.apply(StateChange::Available(false));
        assert_eq!(state.effective_state(), Some(PlaybackState::Off));
    }

    #[test]
    fn change_serializes_with_field_tag() {
        let value = serde_json::to_value(StateChange::VolumeLevel(0.5)).unwrap();
        assert_eq!(value, serde_json::json!({ "field": "volume_level", "value": 0.5 }));
    }
}
