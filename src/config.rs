//! Pipeline configuration loaded from the process environment
//!
//! Every field is optional at load time. Each stage asks for what it
//! needs through a `require_*` accessor, which names the missing
//! variable in its error.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Policy for admitted change events that fail to transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformPolicy {
    /// Abort the whole invocation on the first malformed record
    #[default]
    #[serde(alias = "abort-invocation")]
    Abort,
    /// Drop the malformed record with a warning and continue
    #[serde(alias = "skip-record")]
    Skip,
}

impl FromStr for TransformPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "abort-invocation" => Ok(Self::Abort),
            "skip" | "skip-record" => Ok(Self::Skip),
            other => Err(PipelineError::Config(format!(
                "invalid TRANSFORM_POLICY: '{}' (expected 'abort' or 'skip')",
                other
            ))),
        }
    }
}

/// Environment-backed configuration for both pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Secret store region (`REGION`)
    #[serde(default)]
    pub region: Option<String>,

    /// Secret identifier (`SECRET_NAME`)
    #[serde(default)]
    pub secret_name: Option<String>,

    /// Key of the credential inside the secret (`SECRET_KEY`)
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Vault base URI (`VAULT_URI`)
    #[serde(default)]
    pub vault_uri: Option<String>,

    /// Vault table the records are inserted into (`VAULT_ENTITY`)
    #[serde(default = "default_vault_entity")]
    pub vault_entity: String,

    /// Bus topic (`TOPIC_NAME`)
    #[serde(default)]
    pub topic_name: Option<String>,

    /// Semicolon-delimited broker list (`KAFKA_BROKERS`)
    #[serde(default)]
    pub kafka_brokers: Option<String>,

    /// Producer client id (`KAFKA_CLIENT_ID`)
    #[serde(default = "default_client_id")]
    pub kafka_client_id: String,

    /// Warehouse database name (`DB_NAME`)
    #[serde(default)]
    pub db_name: Option<String>,

    /// Partial-batch transform policy (`TRANSFORM_POLICY`)
    #[serde(default)]
    pub transform_policy: TransformPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: None,
            secret_name: None,
            secret_key: None,
            vault_uri: None,
            vault_entity: default_vault_entity(),
            topic_name: None,
            kafka_brokers: None,
            kafka_client_id: default_client_id(),
            db_name: None,
            transform_policy: TransformPolicy::default(),
        }
    }
}

fn default_vault_entity() -> String {
    "persons".to_string()
}

fn default_client_id() -> String {
    "SkyflowDemo".to_string()
}

/// Broker authentication / connection-establishment timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Producer send retries
pub const PRODUCER_RETRIES: u32 = 2;

impl PipelineConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        envy::from_env::<Self>()
            .map_err(|e| PipelineError::Config(format!("Failed to read environment: {}", e)))
    }

    /// Load configuration from explicit key/value pairs (upper-case keys)
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into()));
        envy::from_iter::<_, Self>(pairs)
            .map_err(|e| PipelineError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Broker list split on `;`
    ///
    /// An unset or empty value yields a single empty-string broker. That
    /// configuration is degenerate and fails at connect time, not here.
    pub fn brokers(&self) -> Vec<String> {
        parse_brokers(self.kafka_brokers.as_deref())
    }

    pub fn require_region(&self) -> Result<&str> {
        require(&self.region, "REGION")
    }

    pub fn require_secret_name(&self) -> Result<&str> {
        require(&self.secret_name, "SECRET_NAME")
    }

    pub fn require_vault_uri(&self) -> Result<&str> {
        require(&self.vault_uri, "VAULT_URI")
    }

    pub fn require_topic_name(&self) -> Result<&str> {
        require(&self.topic_name, "TOPIC_NAME")
    }

    pub fn require_db_name(&self) -> Result<&str> {
        require(&self.db_name, "DB_NAME")
    }

    /// Validate everything the tokenize stage needs
    pub fn validate_tokenize(&self) -> Result<()> {
        self.require_secret_name()?;
        self.require_vault_uri()?;
        self.require_topic_name()?;
        Ok(())
    }

    /// Validate everything the persist stage needs
    pub fn validate_persist(&self) -> Result<()> {
        self.require_secret_name()?;
        self.require_db_name()?;
        Ok(())
    }
}

/// Split a `;`-delimited broker list; `None` yields `[""]`
pub fn parse_brokers(raw: Option<&str>) -> Vec<String> {
    match raw {
        None | Some("") => vec![String::new()],
        Some(list) => list.split(';').map(str::to_string).collect(),
    }
}

fn require<'a>(value: &'a Option<String>, var: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PipelineError::Config(format!("{} is not set", var)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brokers_unset_is_single_empty() {
        assert_eq!(parse_brokers(None), vec![String::new()]);
        assert_eq!(PipelineConfig::default().brokers(), vec![""]);
    }

    #[test]
    fn test_brokers_split_on_semicolon() {
        assert_eq!(
            parse_brokers(Some("b-1:9092;b-2:9092;b-3:9092")),
            vec!["b-1:9092", "b-2:9092", "b-3:9092"]
        );
        assert_eq!(parse_brokers(Some("solo:9092")), vec!["solo:9092"]);
    }

    #[test]
    fn test_from_pairs() {
        let config = PipelineConfig::from_pairs([
            ("REGION", "us-east-2"),
            ("SECRET_NAME", "vault/service-account"),
            ("SECRET_KEY", "credentials"),
            ("VAULT_URI", "https://vault.example.com/v1/vaults/abc"),
            ("TOPIC_NAME", "persons"),
            ("KAFKA_BROKERS", "b-1:9092;b-2:9092"),
            ("TRANSFORM_POLICY", "skip"),
        ])
        .unwrap();

        assert_eq!(config.require_region().unwrap(), "us-east-2");
        assert_eq!(config.secret_key.as_deref(), Some("credentials"));
        assert_eq!(config.vault_entity, "persons");
        assert_eq!(config.kafka_client_id, "SkyflowDemo");
        assert_eq!(config.brokers().len(), 2);
        assert_eq!(config.transform_policy, TransformPolicy::Skip);
        assert!(config.validate_tokenize().is_ok());
        assert!(config.validate_persist().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_pairs(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.transform_policy, TransformPolicy::Abort);
        assert_eq!(config.vault_entity, "persons");
        assert!(config.vault_uri.is_none());
    }

    #[test]
    fn test_require_names_missing_variable() {
        let config = PipelineConfig::default();
        let err = config.require_db_name().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: DB_NAME is not set");

        let err = config.validate_tokenize().unwrap_err();
        assert!(err.to_string().contains("SECRET_NAME"));
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let config = PipelineConfig::from_pairs([("VAULT_URI", "")]).unwrap();
        assert!(config.require_vault_uri().is_err());
    }

    #[test]
    fn test_transform_policy_from_str() {
        assert_eq!("ABORT".parse::<TransformPolicy>().unwrap(), TransformPolicy::Abort);
        assert_eq!("skip-record".parse::<TransformPolicy>().unwrap(), TransformPolicy::Skip);
        assert!("drop".parse::<TransformPolicy>().is_err());
    }

    #[test]
    fn test_invalid_policy_in_env() {
        let result = PipelineConfig::from_pairs([("TRANSFORM_POLICY", "sometimes")]);
        assert!(result.is_err());
    }
}
