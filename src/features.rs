//! Capability negotiation
//!
//! A device can do exactly what its configuration gives it a command topic
//! for. [`CAPABILITY_TABLE`] and [`IMPLICIT_CAPABILITIES`] are the only place
//! that relationship is written down; the validator, the command dispatcher
//! and the player's feature surface all go through [`derive`] or
//! [`Capability::command_field`].

use serde::{Serialize, Serializer};
use std::fmt;

use crate::config::ValidatedConfig;
use crate::types::CommandField;

/// A named optional behavior of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
    VolumeSet,
    VolumeStep,
    VolumeMute,
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

/// Capabilities granted by the presence of their own command topic
pub const CAPABILITY_TABLE: [(CommandField, Capability); 17] = [
    (CommandField::Play, Capability::Play),
    (CommandField::Pause, Capability::Pause),
    (CommandField::Stop, Capability::Stop),
    (CommandField::Next, Capability::NextTrack),
    (CommandField::Previous, Capability::PreviousTrack),
    (CommandField::VolumeSet, Capability::VolumeSet),
    (CommandField::Mute, Capability::VolumeMute),
    (CommandField::ShuffleSet, Capability::ShuffleSet),
    (CommandField::RepeatSet, Capability::RepeatSet),
    (CommandField::Seek, Capability::Seek),
    (CommandField::TurnOn, Capability::TurnOn),
    (CommandField::TurnOff, Capability::TurnOff),
    (CommandField::SelectSource, Capability::SelectSource),
    (CommandField::SelectSoundMode, Capability::SelectSoundMode),
    (CommandField::PlayMedia, Capability::PlayMedia),
    (CommandField::ClearPlaylist, Capability::ClearPlaylist),
    (CommandField::BrowseMedia, Capability::BrowseMedia),
];

/// Capabilities implied by another capability's command topic
pub const IMPLICIT_CAPABILITIES: [(Capability, CommandField); 1] =
    [(Capability::VolumeStep, CommandField::VolumeSet)];

impl Capability {
    pub const ALL: [Capability; 18] = [
        Capability::Play,
        Capability::Pause,
        Capability::Stop,
        Capability::NextTrack,
        Capability::PreviousTrack,
        Capability::VolumeSet,
        Capability::VolumeStep,
        Capability::VolumeMute,
        Capability::ShuffleSet,
        Capability::RepeatSet,
        Capability::Seek,
        Capability::TurnOn,
        Capability::TurnOff,
        Capability::SelectSource,
        Capability::SelectSoundMode,
        Capability::PlayMedia,
        Capability::ClearPlaylist,
        Capability::BrowseMedia,
    ];

    /// Flag name as advertised to the host (`supports_*`)
    pub fn flag_name(self) -> &'static str {
        match self {
            Capability::Play => "supports_play",
            Capability::Pause => "supports_pause",
            Capability::Stop => "supports_stop",
            Capability::NextTrack => "supports_next_track",
            Capability::PreviousTrack => "supports_previous_track",
            Capability::VolumeSet => "supports_volume_set",
            Capability::VolumeStep => "supports_volume_step",
            Capability::VolumeMute => "supports_volume_mute",
            Capability::ShuffleSet => "supports_shuffle_set",
            Capability::RepeatSet => "supports_repeat_set",
            Capability::Seek => "supports_seek",
            Capability::TurnOn => "supports_turn_on",
            Capability::TurnOff => "supports_turn_off",
            Capability::SelectSource => "supports_select_source",
            Capability::SelectSoundMode => "supports_select_sound_mode",
            Capability::PlayMedia => "supports_play_media",
            Capability::ClearPlaylist => "supports_clear_playlist",
            Capability::BrowseMedia => "supports_browse_media",
        }
    }

    /// Command topic this capability publishes to
    ///
    /// Implicit capabilities resolve to the topic they were derived from.
    pub fn command_field(self) -> Option<CommandField> {
        CAPABILITY_TABLE
            .iter()
            .find(|(_, cap)| *cap == self)
            .map(|(field, _)| *field)
            .or_else(|| {
                IMPLICIT_CAPABILITIES
                    .iter()
                    .find(|(cap, _)| *cap == self)
                    .map(|(_, field)| *field)
            })
    }

    /// Whether this capability has no topic of its own
    pub fn is_implicit(self) -> bool {
        IMPLICIT_CAPABILITIES.iter().any(|(cap, _)| *cap == self)
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag_name())
    }
}

/// Fixed set of capabilities derived from a configuration
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(move |cap| self.contains(*cap))
    }

    /// `supports_*` flag names of the present capabilities
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(Capability::flag_name).collect()
    }

    fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::empty();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            Capability::ALL
                .into_iter()
                .map(|cap| (cap.flag_name(), self.contains(cap))),
        )
    }
}

/// Derive the capability set of a validated configuration
pub fn derive(config: &ValidatedConfig) -> CapabilitySet {
    derive_from(|field| config.command_topic(field).is_some())
}

/// Derive capabilities from a topic-presence predicate
///
/// Topics must already be normalized: present means present and non-empty.
pub(crate) fn derive_from(has_topic: impl Fn(CommandField) -> bool) -> CapabilitySet {
    let direct = CAPABILITY_TABLE
        .iter()
        .filter(|(field, _)| has_topic(*field))
        .map(|(_, cap)| *cap);
    let implicit = IMPLICIT_CAPABILITIES
        .iter()
        .filter(|(_, field)| has_topic(*field))
        .map(|(cap, _)| *cap);
    direct.chain(implicit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate;
    use serde_json::{json, Map, Value};

    #[test]
    fn every_capability_is_in_exactly_one_table() {
        for cap in Capability::ALL {
            let direct = CAPABILITY_TABLE.iter().filter(|(_, c)| *c == cap).count();
            let implicit = IMPLICIT_CAPABILITIES
                .iter()
                .filter(|(c, _)| *c == cap)
                .count();
            assert_eq!(direct + implicit, 1, "{cap}");
        }
    }

    #[test]
    fn capability_follows_topic_presence_for_every_row() {
        for (field, cap) in CAPABILITY_TABLE {
            let mut doc = Map::new();
            doc.insert(field.config_key().to_string(), json!("player/cmd"));
            let config = validate(&Value::Object(doc)).unwrap();
            assert!(config.capabilities().contains(cap), "{cap} missing");
            assert_eq!(
                config.capabilities().len(),
                if field == CommandField::VolumeSet { 2 } else { 1 }
            );

            let empty = validate(&json!({})).unwrap();
            assert!(!empty.capabilities().contains(cap));
        }
    }

    #[test]
    fn empty_topic_grants_nothing() {
        let config = validate(&json!({ "play_topic": "", "pause_topic": "   " })).unwrap();
        assert!(config.capabilities().is_empty());
    }

    #[test]
    fn volume_step_is_implied_by_volume_set() {
        let config = validate(&json!({ "volume_set_topic": "tv/volume/set" })).unwrap();
        let caps = config.capabilities();
        assert!(caps.contains(Capability::VolumeSet));
        assert!(caps.contains(Capability::VolumeStep));
        assert!(Capability::VolumeStep.is_implicit());
        assert_eq!(
            Capability::VolumeStep.command_field(),
            Some(CommandField::VolumeSet)
        );
    }

    #[test]
    fn serializes_as_flag_map() {
        let caps: CapabilitySet = [Capability::Play].into_iter().collect();
        let value = serde_json::to_value(caps).unwrap();
        assert_eq!(value["supports_play"], json!(true));
        assert_eq!(value["supports_pause"], json!(false));
        assert_eq!(value.as_object().unwrap().len(), 18);
    }
}
