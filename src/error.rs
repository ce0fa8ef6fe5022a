use thiserror::Error as ThisError;

/// Reasons a state-node submission is refused before it is buffered.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum StateRejection {
    #[error("msg.payload missing")]
    MissingPayload,

    #[error("msg.payload missing state element")]
    MissingState,

    #[error("msg.acknowledge missing or not true")]
    MissingAcknowledge,

    #[error("invalid state field '{field}': {reason}")]
    InvalidFieldType { field: String, reason: String },

    #[error("cannot combine 'color' and 'colorTemperature' in one state update")]
    ConflictingColorFields,

    #[error("unexpected or unsupported command: {0}")]
    UnsupportedCommand(String),
}

impl StateRejection {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldType {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("MQTT transport not connected")]
    TransportUnavailable,

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("State update rejected: {0}")]
    Rejected(#[from] StateRejection),

    #[error("Account not configured: {0}")]
    AccountNotFound(String),

    #[error("Device directory lookup failed: {0}")]
    Directory(String),

    #[error("State reporter closed")]
    ReporterClosed,

    #[error("Downstream flow closed")]
    FlowClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
