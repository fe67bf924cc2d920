//! Per-field payload parsers
//!
//! Every state topic has one pure parser turning the raw payload into a
//! [`StateChange`]. A parser returning `Err` means "leave the field alone";
//! fields whose unknown value is itself meaningful (duration, position,
//! track) return `Ok` with `None` instead.

use serde_json::Value;

use crate::error::ParseError;
use crate::state::StateChange;
use crate::types::{AvailabilityTokens, PlaybackState, RepeatMode, StateField};

/// Payloads (lower-cased) read as `true` for boolean toggles
pub const TRUTHY_TOKENS: [&str; 4] = ["true", "1", "on", "yes"];

/// Content type assumed when the device publishes an empty one
pub const DEFAULT_CONTENT_TYPE: &str = "music";

/// Signature shared by every field parser
pub type FieldParser = fn(&str, &AvailabilityTokens) -> Result<StateChange, ParseError>;

/// Look up the parser bound to a state field
pub fn parser_for(field: StateField) -> FieldParser {
    match field {
        StateField::State => |p, _| parse_state(p),
        StateField::Availability => parse_availability,
        StateField::MediaTitle => |p, _| Ok(StateChange::MediaTitle(text(p))),
        StateField::MediaArtist => |p, _| Ok(StateChange::MediaArtist(text(p))),
        StateField::MediaAlbumName => |p, _| Ok(StateChange::MediaAlbumName(text(p))),
        StateField::MediaAlbumArtist => |p, _| Ok(StateChange::MediaAlbumArtist(text(p))),
        StateField::MediaTrack => |p, _| Ok(StateChange::MediaTrack(track(p))),
        StateField::MediaDuration => |p, _| Ok(StateChange::MediaDuration(duration(p))),
        StateField::MediaPosition => |p, _| Ok(StateChange::MediaPosition(position(p))),
        StateField::MediaContentType => |p, _| {
            let content_type = text(p).unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            Ok(StateChange::MediaContentType(content_type))
        },
        StateField::MediaImageUrl => |p, _| Ok(StateChange::MediaImageUrl(text(p))),
        StateField::MediaEpisode => |p, _| Ok(StateChange::MediaEpisode(text(p))),
        StateField::MediaSeason => |p, _| Ok(StateChange::MediaSeason(text(p))),
        StateField::MediaSeriesTitle => |p, _| Ok(StateChange::MediaSeriesTitle(text(p))),
        StateField::MediaChannel => |p, _| Ok(StateChange::MediaChannel(text(p))),
        StateField::MediaPlaylist => |p, _| Ok(StateChange::MediaPlaylist(text(p))),
        StateField::VolumeLevel => |p, _| parse_volume(p),
        StateField::IsVolumeMuted => |p, _| Ok(StateChange::IsVolumeMuted(truthy(p))),
        StateField::Shuffle => |p, _| Ok(StateChange::Shuffle(truthy(p))),
        StateField::Repeat => |p, _| parse_repeat(p),
        StateField::Source => |p, _| Ok(StateChange::Source(text(p))),
        StateField::SourceList => |p, _| {
            list(StateField::SourceList, p).map(StateChange::SourceList)
        },
        StateField::SoundMode => |p, _| Ok(StateChange::SoundMode(text(p))),
        StateField::SoundModeList => |p, _| {
            list(StateField::SoundModeList, p).map(StateChange::SoundModeList)
        },
        StateField::AppId => |p, _| Ok(StateChange::AppId(text(p))),
        StateField::AppName => |p, _| Ok(StateChange::AppName(text(p))),
        StateField::GroupMembers => |p, _| {
            list(StateField::GroupMembers, p).map(StateChange::GroupMembers)
        },
    }
}

/// Parse a payload for `field`
pub fn parse(
    field: StateField,
    payload: &str,
    tokens: &AvailabilityTokens,
) -> Result<StateChange, ParseError> {
    parser_for(field)(payload, tokens)
}

fn parse_state(payload: &str) -> Result<StateChange, ParseError> {
    PlaybackState::from_token(payload.trim())
        .map(StateChange::State)
        .ok_or_else(|| ParseError::new("state", "not a valid playback state", payload))
}

fn parse_availability(
    payload: &str,
    tokens: &AvailabilityTokens,
) -> Result<StateChange, ParseError> {
    let payload = payload.trim();
    if payload == tokens.payload_available {
        Ok(StateChange::Available(true))
    } else if payload == tokens.payload_not_available {
        Ok(StateChange::Available(false))
    } else {
        Err(ParseError::new(
            "available",
            "matches neither availability token",
            payload,
        ))
    }
}

fn parse_volume(payload: &str) -> Result<StateChange, ParseError> {
    let volume = finite(payload)
        .ok_or_else(|| ParseError::new("volume_level", "not a number", payload))?;
    if (0.0..=1.0).contains(&volume) {
        Ok(StateChange::VolumeLevel(volume))
    } else {
        Err(ParseError::new(
            "volume_level",
            "outside 0.0..=1.0",
            payload,
        ))
    }
}

fn parse_repeat(payload: &str) -> Result<StateChange, ParseError> {
    RepeatMode::from_token(&payload.trim().to_lowercase())
        .map(StateChange::Repeat)
        .ok_or_else(|| ParseError::new("repeat", "not a valid repeat mode", payload))
}

fn text(payload: &str) -> Option<String> {
    let trimmed = payload.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn truthy(payload: &str) -> bool {
    let lowered = payload.trim().to_lowercase();
    TRUTHY_TOKENS.contains(&lowered.as_str())
}

/// Only finite values; `"nan"` and `"inf"` count as unparsable
fn finite(payload: &str) -> Option<f64> {
    payload
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn duration(payload: &str) -> Option<u64> {
    finite(payload)
        .filter(|seconds| *seconds > 0.0)
        .map(|seconds| seconds.ceil() as u64)
}

fn position(payload: &str) -> Option<u64> {
    finite(payload)
        .filter(|seconds| *seconds >= 0.0)
        .map(|seconds| seconds.ceil() as u64)
}

fn track(payload: &str) -> Option<u32> {
    payload.trim().parse().ok()
}

fn list(field: StateField, payload: &str) -> Result<Vec<String>, ParseError> {
    let value: Value = serde_json::from_str(payload.trim())
        .map_err(|_| ParseError::new(field.name(), "invalid JSON", payload))?;

    let Value::Array(items) = value else {
        return Err(ParseError::new(field.name(), "not a JSON array", payload));
    };

    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}
