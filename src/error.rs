use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while bridging a media player
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration document failed validation
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A single state payload could not be interpreted
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Transport-level failure while the discovery window was open
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Publishing a command failed
    #[error("Failed to publish to {topic}: {reason}")]
    Dispatch {
        /// Topic the command was addressed to
        topic: String,
        /// Transport failure detail
        reason: String,
    },

    /// A device with this unique id is already configured
    #[error("Device already configured: {0}")]
    DuplicateIdentity(String),

    /// MQTT client error
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The bus went away
    #[error("Connection closed")]
    ConnectionClosed,

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// A command argument that cannot be sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Structural validation failure of a configuration document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The document is not a JSON object
    #[error("configuration must be a JSON object")]
    NotAnObject,

    /// A key outside the schema was present
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// A recognized key had the wrong JSON type
    #[error("field {field} must be {expected}")]
    InvalidType {
        field: String,
        expected: &'static str,
    },

    /// The component discriminator names another component
    #[error("unexpected component type: {0}")]
    UnexpectedComponentType(String),
}

impl SchemaError {
    /// Stable reason code for user-facing error reporting
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::NotAnObject => "not_an_object",
            SchemaError::UnknownField(_) => "unknown_field",
            SchemaError::InvalidType { .. } => "invalid_type",
            SchemaError::UnexpectedComponentType(_) => "unexpected_component_type",
        }
    }

    /// The offending field, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            SchemaError::UnknownField(field) | SchemaError::InvalidType { field, .. } => {
                Some(field)
            }
            SchemaError::UnexpectedComponentType(_) => Some("component"),
            SchemaError::NotAnObject => None,
        }
    }
}

/// A state payload that could not be applied to its field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason} (payload {payload:?})")]
pub struct ParseError {
    pub field: &'static str,
    pub reason: &'static str,
    pub payload: String,
}

impl ParseError {
    pub(crate) fn new(field: &'static str, reason: &'static str, payload: &str) -> Self {
        Self {
            field,
            reason,
            payload: payload.to_string(),
        }
    }
}
