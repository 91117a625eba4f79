//! Service-account and database credentials read from the secret store
//!
//! Secret payloads are parsed in memory and never logged. `Debug` on
//! the credential types redacts key material and passwords.

use crate::error::{PipelineError, Result};
use crate::provider::SecretStore;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

/// Service-account key used to mint signed assertions
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "clientID")]
    pub client_id: String,

    #[serde(rename = "keyID")]
    pub key_id: String,

    #[serde(rename = "tokenURI")]
    pub token_uri: String,

    #[serde(rename = "privateKey")]
    pub private_key: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("key_id", &self.key_id)
            .field("token_uri", &self.token_uri)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Warehouse connection parameters
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub host: String,
    pub password: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse a service-account credential from a raw secret string
///
/// With a `secret_key`, the credential is the value under that key: a
/// JSON-encoded string or an inline object. Without one, the credential
/// fields are expected at the top level.
pub fn parse_credential(secret: &str, secret_key: Option<&str>) -> Result<Credential> {
    let value: serde_json::Value = serde_json::from_str(secret)
        .map_err(|e| PipelineError::Credential(format!("Secret is not valid JSON: {}", e)))?;

    let inner = match secret_key {
        Some(key) => value.get(key).cloned().ok_or_else(|| {
            PipelineError::Credential(format!("Secret has no entry for key '{}'", key))
        })?,
        None => value,
    };

    let credential = match inner {
        serde_json::Value::String(encoded) => serde_json::from_str::<Credential>(&encoded),
        other => serde_json::from_value::<Credential>(other),
    }
    .map_err(|e| {
        PipelineError::Credential(format!("Secret is not a service-account credential: {}", e))
    })?;

    Ok(credential)
}

/// Parse warehouse connection parameters from a raw secret string
pub fn parse_database_credentials(secret: &str) -> Result<DatabaseCredentials> {
    serde_json::from_str(secret).map_err(|e| {
        PipelineError::Credential(format!("Secret is not a database credential: {}", e))
    })
}

/// Fetches credentials from a secret store
///
/// Holds no cache: every `fetch` goes to the store.
#[derive(Clone)]
pub struct CredentialProvider {
    store: Arc<dyn SecretStore>,
    secret_id: String,
    secret_key: Option<String>,
}

impl CredentialProvider {
    /// Create a provider reading the given secret
    pub fn new(store: Arc<dyn SecretStore>, secret_id: impl Into<String>) -> Self {
        Self {
            store,
            secret_id: secret_id.into(),
            secret_key: None,
        }
    }

    /// Read the credential from a named entry inside the secret
    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    /// Fetch and parse the service-account credential
    pub async fn fetch(&self) -> Result<Credential> {
        let secret = self.store.get_secret(&self.secret_id).await?;
        let credential = parse_credential(&secret, self.secret_key.as_deref())?;

        tracing::debug!(
            secret = %self.secret_id,
            store = self.store.name(),
            client_id = %credential.client_id,
            "Service-account credential fetched"
        );

        Ok(credential)
    }

    /// Fetch and parse warehouse connection parameters
    pub async fn fetch_database(&self) -> Result<DatabaseCredentials> {
        let secret = self.store.get_secret(&self.secret_id).await?;
        let credentials = parse_database_credentials(&secret)?;

        tracing::debug!(
            secret = %self.secret_id,
            store = self.store.name(),
            host = %credentials.host,
            "Database credentials fetched"
        );

        Ok(credentials)
    }
}
