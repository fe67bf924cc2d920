//! Discovery document validation
//!
//! Turns the untyped JSON a device advertises into a [`ValidatedConfig`].
//! The schema is strict: unknown keys are rejected rather than ignored, so a
//! misspelled topic key surfaces as an error instead of a silently missing
//! feature.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{BridgeError, SchemaError};
use crate::features::{self, CapabilitySet};
use crate::types::{
    AvailabilityTokens, CommandField, DeviceDescriptor, StateField, DEFAULT_PAYLOAD_AVAILABLE,
    DEFAULT_PAYLOAD_NOT_AVAILABLE,
};

/// The only component type this crate accepts
pub const COMPONENT: &str = "media_player";

/// Schema-conformant device configuration
///
/// Built once by [`validate`] and never mutated afterwards. The capability
/// set is computed at construction from topic presence alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub name: Option<String>,
    pub unique_id: Option<String>,
    pub device: DeviceDescriptor,
    pub availability: AvailabilityTokens,
    state_topics: BTreeMap<StateField, String>,
    command_topics: BTreeMap<CommandField, String>,
    capabilities: CapabilitySet,
}

impl ValidatedConfig {
    /// Topic to subscribe to for a state field, if configured
    pub fn state_topic(&self, field: StateField) -> Option<&str> {
        self.state_topics.get(&field).map(String::as_str)
    }

    /// Topic to publish a command to, if configured
    pub fn command_topic(&self, field: CommandField) -> Option<&str> {
        self.command_topics.get(&field).map(String::as_str)
    }

    /// All configured state topics
    pub fn state_topics(&self) -> impl Iterator<Item = (StateField, &str)> {
        self.state_topics
            .iter()
            .map(|(field, topic)| (*field, topic.as_str()))
    }

    /// All configured command topics
    pub fn command_topics(&self) -> impl Iterator<Item = (CommandField, &str)> {
        self.command_topics
            .iter()
            .map(|(field, topic)| (*field, topic.as_str()))
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Parse and validate a raw JSON payload
    pub fn from_json_str(payload: &str) -> Result<Self, BridgeError> {
        let raw: Value = serde_json::from_str(payload)?;
        Ok(validate(&raw)?)
    }

    /// Render back into a discovery document
    ///
    /// Validating the result yields an equal configuration.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        if let Some(name) = &self.name {
            doc.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(unique_id) = &self.unique_id {
            doc.insert("unique_id".into(), Value::String(unique_id.clone()));
        }
        doc.insert("component".into(), Value::String(COMPONENT.into()));
        // DeviceDescriptor and AvailabilityTokens only hold strings
        if let Ok(device) = serde_json::to_value(&self.device) {
            doc.insert("device".into(), device);
        }
        if let Ok(availability) = serde_json::to_value(&self.availability) {
            doc.insert("availability".into(), availability);
        }
        for (field, topic) in &self.state_topics {
            doc.insert(field.config_key().into(), Value::String(topic.clone()));
        }
        for (field, topic) in &self.command_topics {
            doc.insert(field.config_key().into(), Value::String(topic.clone()));
        }
        Value::Object(doc)
    }
}

/// Validate a raw discovery document
pub fn validate(raw: &Value) -> Result<ValidatedConfig, SchemaError> {
    let doc = raw.as_object().ok_or(SchemaError::NotAnObject)?;

    let mut name = None;
    let mut unique_id = None;
    let mut device = DeviceDescriptor::default();
    let mut availability = AvailabilityTokens::default();
    let mut state_topics = BTreeMap::new();
    let mut command_topics = BTreeMap::new();

    for (key, value) in doc {
        match key.as_str() {
            "name" => name = Some(expect_string(key, value)?),
            "unique_id" => unique_id = Some(expect_string(key, value)?),
            "component" => {
                let component = expect_string(key, value)?;
                if component != COMPONENT {
                    return Err(SchemaError::UnexpectedComponentType(component));
                }
            }
            "device" => device = validate_device(value)?,
            "availability" => availability = validate_availability(value)?,
            other => {
                if let Some(field) = StateField::from_config_key(other) {
                    if let Some(topic) = expect_topic(key, value)? {
                        state_topics.insert(field, topic);
                    }
                } else if let Some(field) = CommandField::from_config_key(other) {
                    if let Some(topic) = expect_topic(key, value)? {
                        command_topics.insert(field, topic);
                    }
                } else {
                    return Err(SchemaError::UnknownField(other.to_string()));
                }
            }
        }
    }

    let capabilities = features::derive_from(|field| command_topics.contains_key(&field));

    Ok(ValidatedConfig {
        name,
        unique_id,
        device,
        availability,
        state_topics,
        command_topics,
        capabilities,
    })
}

fn validate_device(value: &Value) -> Result<DeviceDescriptor, SchemaError> {
    let obj = expect_object("device", value)?;
    let mut device = DeviceDescriptor::default();

    for (key, value) in obj {
        let path = format!("device.{key}");
        match key.as_str() {
            "identifiers" => {
                let items = value.as_array().ok_or_else(|| SchemaError::InvalidType {
                    field: path.clone(),
                    expected: "a list of strings",
                })?;
                device.identifiers = Some(
                    items
                        .iter()
                        .map(|item| expect_string(&path, item))
                        .collect::<Result<_, _>>()?,
                );
            }
            "manufacturer" => device.manufacturer = expect_string(&path, value)?,
            "model" => device.model = expect_string(&path, value)?,
            "name" => device.name = Some(expect_string(&path, value)?),
            "sw_version" => device.sw_version = expect_string(&path, value)?,
            "configuration_url" => device.configuration_url = Some(expect_string(&path, value)?),
            _ => return Err(SchemaError::UnknownField(path)),
        }
    }

    Ok(device)
}

fn validate_availability(value: &Value) -> Result<AvailabilityTokens, SchemaError> {
    let obj = expect_object("availability", value)?;
    let mut tokens = AvailabilityTokens::default();

    for (key, value) in obj {
        let path = format!("availability.{key}");
        match key.as_str() {
            "payload_available" => tokens.payload_available = expect_string(&path, value)?,
            "payload_not_available" => {
                tokens.payload_not_available = expect_string(&path, value)?
            }
            _ => return Err(SchemaError::UnknownField(path)),
        }
    }

    Ok(tokens)
}

fn expect_object<'a>(field: &str, value: &'a Value) -> Result<&'a Map<String, Value>, SchemaError> {
    value.as_object().ok_or_else(|| SchemaError::InvalidType {
        field: field.to_string(),
        expected: "an object",
    })
}

fn expect_string(field: &str, value: &Value) -> Result<String, SchemaError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SchemaError::InvalidType {
            field: field.to_string(),
            expected: "a string",
        })
}

/// Blank topics count as not configured
fn expect_topic(field: &str, value: &Value) -> Result<Option<String>, SchemaError> {
    let topic = expect_string(field, value)?;
    Ok((!topic.trim().is_empty()).then_some(topic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Capability;
    use serde_json::json;

    fn full_document() -> Value {
        json!({
            "name": "Living Room TV",
            "unique_id": "living_room_tv",
            "component": "media_player",
            "device": {
                "identifiers": ["tv-01"],
                "manufacturer": "Acme",
                "model": "Screen 9000",
                "name": "TV",
                "sw_version": "1.4.2",
                "configuration_url": "http://10.0.0.12/"
            },
            "availability": {
                "payload_available": "up",
                "payload_not_available": "down"
            },
            "state_topic": "tv/state",
            "media_title_topic": "tv/title",
            "volume_level_topic": "tv/volume",
            "availability_topic": "tv/availability",
            "play_topic": "tv/cmd/play",
            "volume_set_topic": "tv/cmd/volume",
            "select_source_topic": "tv/cmd/source"
        })
    }

    #[test]
    fn validates_full_document() {
        let config = validate(&full_document()).unwrap();
        assert_eq!(config.name.as_deref(), Some("Living Room TV"));
        assert_eq!(config.device.manufacturer, "Acme");
        assert_eq!(config.device.identifiers, Some(vec!["tv-01".to_string()]));
        assert_eq!(config.availability.payload_available, "up");
        assert_eq!(config.state_topic(StateField::State), Some("tv/state"));
        assert_eq!(config.state_topic(StateField::MediaArtist), None);
        assert_eq!(config.command_topic(CommandField::Play), Some("tv/cmd/play"));
        assert_eq!(
            config.capabilities().names(),
            vec![
                "supports_play",
                "supports_volume_set",
                "supports_volume_step",
                "supports_select_source"
            ]
        );
    }

    #[test]
    fn applies_defaults() {
        let config = validate(&json!({ "device": {} })).unwrap();
        assert_eq!(config.device.manufacturer, "MQTT Media Player");
        assert_eq!(config.device.model, "MQTT Media Player");
        assert_eq!(config.device.sw_version, "2.0.0");
        assert_eq!(config.availability.payload_available, DEFAULT_PAYLOAD_AVAILABLE);
        assert_eq!(
            config.availability.payload_not_available,
            DEFAULT_PAYLOAD_NOT_AVAILABLE
        );
        assert!(config.capabilities().is_empty());
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let err = validate(&json!({ "stat_topic": "tv/state" })).unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("stat_topic".into()));
    }

    #[test]
    fn rejects_unknown_nested_keys() {
        let err = validate(&json!({ "device": { "serial": "x" } })).unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("device.serial".into()));

        let err = validate(&json!({ "availability": { "topic": "x" } })).unwrap_err();
        assert_eq!(err, SchemaError::UnknownField("availability.topic".into()));
    }

    #[test]
    fn rejects_capability_flags_as_input() {
        let err = validate(&json!({ "supports_play": true })).unwrap_err();
        assert_eq!(err.code(), "unknown_field");
    }

    #[test]
    fn rejects_wrong_component() {
        let err = validate(&json!({ "component": "light" })).unwrap_err();
        assert_eq!(err, SchemaError::UnexpectedComponentType("light".into()));
    }

    #[test]
    fn rejects_wrong_types() {
        let err = validate(&json!({ "play_topic": 5 })).unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidType {
                field: "play_topic".into(),
                expected: "a string"
            }
        );

        let err = validate(&json!({ "name": null })).unwrap_err();
        assert_eq!(err.field(), Some("name"));

        let err = validate(&json!({ "device": { "identifiers": "tv-01" } })).unwrap_err();
        assert_eq!(err.field(), Some("device.identifiers"));

        let err = validate(&json!({ "device": { "identifiers": ["a", 2] } })).unwrap_err();
        assert_eq!(err.code(), "invalid_type");

        assert_eq!(validate(&json!(["a"])).unwrap_err(), SchemaError::NotAnObject);
    }

    #[test]
    fn revalidation_is_idempotent() {
        let first = validate(&full_document()).unwrap();
        let second = validate(&first.to_document()).unwrap();
        assert_eq!(first, second);
        assert_eq!(features::derive(&second), first.capabilities());
    }

    #[test]
    fn from_json_str_reports_bad_json() {
        let err = ValidatedConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, BridgeError::Json(_)));

        let config = ValidatedConfig::from_json_str(r#"{"pause_topic":"p"}"#).unwrap();
        assert!(config.capabilities().contains(Capability::Pause));
    }
}
