//! Error types for vault-relay

use thiserror::Error;

/// Errors that can occur in the tokenization and delivery pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Secret store unreachable or secret value unparseable
    #[error("Credential error: {0}")]
    Credential(String),

    /// Assertion signing or token exchange failure
    #[error("Auth error: {0}")]
    Auth(String),

    /// Token endpoint answered with a non-success status
    #[error("Token endpoint rejected the assertion with status {status}: {body}")]
    AuthRejected { status: u16, body: String },

    /// Tokenization request failed or the response was malformed
    #[error("Vault error: {0}")]
    Vault(String),

    /// Vault answered with a non-success status
    #[error("Vault rejected the tokenization request with status {status}: {body}")]
    VaultRejected { status: u16, body: String },

    /// An admitted change event is missing a required field
    #[error("Transform error on field '{field}'{}: {reason}", event_suffix(.event_id))]
    Transform {
        event_id: Option<String>,
        field: String,
        reason: String,
    },

    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Send failure
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Warehouse insert or transaction failure
    #[error("Failed to persist batch{}: {reason}", row_suffix(.skyflow_id))]
    Persist {
        skyflow_id: Option<String>,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bus payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// The stage-level category an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Credential,
    Auth,
    Vault,
    Transform,
    Publish,
    Persist,
    Config,
    Decode,
}

impl PipelineError {
    /// Classify this error into its stage category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Credential(_) => ErrorKind::Credential,
            Self::Auth(_) | Self::AuthRejected { .. } => ErrorKind::Auth,
            Self::Vault(_) | Self::VaultRejected { .. } => ErrorKind::Vault,
            Self::Transform { .. } => ErrorKind::Transform,
            Self::Connection(_) | Self::Publish { .. } | Self::Timeout(_) => ErrorKind::Publish,
            Self::Persist { .. } => ErrorKind::Persist,
            Self::Config(_) => ErrorKind::Config,
            Self::Decode(_) | Self::Serialization(_) => ErrorKind::Decode,
        }
    }

    pub(crate) fn transform(
        event_id: Option<&str>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Transform {
            event_id: event_id.map(str::to_string),
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn persist(skyflow_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Persist {
            skyflow_id: skyflow_id.map(str::to_string),
            reason: reason.into(),
        }
    }
}

fn event_suffix(event_id: &Option<String>) -> String {
    event_id
        .as_ref()
        .map(|id| format!(" (event {})", id))
        .unwrap_or_default()
}

fn row_suffix(skyflow_id: &Option<String>) -> String {
    skyflow_id
        .as_ref()
        .map(|id| format!(" at row {}", id))
        .unwrap_or_default()
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
