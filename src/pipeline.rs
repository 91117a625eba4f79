//! The two triggered stages
//!
//! [`TokenizationStage`] turns a change-stream batch into tokenized
//! records on the bus. [`PersistStage`] writes a batch of bus messages
//! into the warehouse. Each `handle` call is one short-lived invocation.

use crate::auth::AuthTokenIssuer;
use crate::capture::capture;
use crate::config::{PipelineConfig, TransformPolicy};
use crate::credential::CredentialProvider;
use crate::error::Result;
use crate::publisher::{PublishOutcome, Publisher};
use crate::sink::{SinkState, WarehouseSink};
use crate::types::{ChangeStreamEvent, KafkaTriggerEvent};
use crate::vault::VaultTokenizer;
use std::fmt;
use std::future::Future;
use tracing::Instrument;
use uuid::Uuid;

/// Result of one tokenization invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizeOutcome {
    /// No insert events in the batch; nothing was fetched or sent
    NoData,
    /// Records were tokenized; `publish` reports the relay separately
    Tokenized {
        records: usize,
        publish: PublishOutcome,
    },
}

impl TokenizeOutcome {
    /// Whether tokenized records reached the bus
    pub fn is_delivered(&self) -> bool {
        match self {
            Self::NoData => true,
            Self::Tokenized { publish, .. } => publish.is_delivered(),
        }
    }
}

impl fmt::Display for TokenizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "No data to insert."),
            Self::Tokenized { publish, .. } => write!(f, "{}", publish),
        }
    }
}

/// Capture, tokenize, and relay one change-stream batch
pub struct TokenizationStage {
    credentials: CredentialProvider,
    issuer: AuthTokenIssuer,
    tokenizer: VaultTokenizer,
    publisher: Publisher,
    vault_uri: String,
    entity: String,
    topic: String,
    policy: TransformPolicy,
}

impl TokenizationStage {
    pub fn new(
        credentials: CredentialProvider,
        publisher: Publisher,
        vault_uri: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::new();
        Self {
            credentials,
            issuer: AuthTokenIssuer::new(http.clone()),
            tokenizer: VaultTokenizer::new(http),
            publisher,
            vault_uri: vault_uri.into(),
            entity: "persons".to_string(),
            topic: topic.into(),
            policy: TransformPolicy::default(),
        }
    }

    /// Build from environment configuration
    pub fn from_config(
        config: &PipelineConfig,
        credentials: CredentialProvider,
        publisher: Publisher,
    ) -> Result<Self> {
        config.validate_tokenize()?;
        Ok(Self::new(
            credentials,
            publisher,
            config.require_vault_uri()?,
            config.require_topic_name()?,
        )
        .with_entity(config.vault_entity.clone())
        .with_policy(config.transform_policy))
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    pub fn with_policy(mut self, policy: TransformPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the token issuer, e.g. with one that caches tokens
    pub fn with_issuer(mut self, issuer: AuthTokenIssuer) -> Self {
        self.issuer = issuer;
        self
    }

    /// Handle one change-stream batch
    ///
    /// Credential, auth, vault, and transform failures are returned as
    /// errors. A publish failure is reported in the outcome; the vault
    /// records it follows already exist.
    pub async fn handle(&self, event: &ChangeStreamEvent) -> Result<TokenizeOutcome> {
        let span = tracing::info_span!(
            "tokenize",
            invocation_id = %Uuid::new_v4(),
            topic = %self.topic
        );
        self.run(event).instrument(span).await
    }

    async fn run(&self, event: &ChangeStreamEvent) -> Result<TokenizeOutcome> {
        let records = capture(&event.records, self.policy)?;
        if records.is_empty() {
            tracing::info!(events = event.records.len(), "No data to insert");
            return Ok(TokenizeOutcome::NoData);
        }

        let credential = self.credentials.fetch().await?;
        let bearer = self.issuer.issue_bearer(&credential).await?;
        drop(credential);

        let tokenized = self
            .tokenizer
            .tokenize(&self.vault_uri, &bearer, &self.entity, &records)
            .await?;

        let publish = self.publisher.publish(&self.topic, &tokenized).await;
        if !publish.is_delivered() {
            tracing::warn!(records = tokenized.len(), outcome = %publish, "Tokenized records were not relayed");
        }

        Ok(TokenizeOutcome::Tokenized {
            records: tokenized.len(),
            publish,
        })
    }
}

/// Result of one persist invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The trigger carried no messages
    NoRecords,
    /// Every row was committed
    Persisted { rows: usize },
}

impl fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecords => write!(f, "No records to persist."),
            Self::Persisted { rows } => write!(f, "Successfully processed {} records.", rows),
        }
    }
}

/// Decode a triggered batch of bus messages and commit it
pub struct PersistStage {
    sink: WarehouseSink,
}

impl PersistStage {
    pub fn new(sink: WarehouseSink) -> Self {
        Self { sink }
    }

    /// Handle one trigger batch, building the sink only if there is
    /// something to write
    ///
    /// An empty trigger returns [`PersistOutcome::NoRecords`] without
    /// calling `connect`, so no secret is read and no connection opened.
    pub async fn handle_connecting<F, Fut>(
        event: &KafkaTriggerEvent,
        connect: F,
    ) -> Result<PersistOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<WarehouseSink>>,
    {
        if event.is_empty() {
            tracing::info!("No records to persist");
            return Ok(PersistOutcome::NoRecords);
        }

        let stage = Self::new(connect().await?);
        stage.handle(event).await
    }

    /// Handle one trigger batch
    ///
    /// Decode and persist failures are returned so the trigger redelivers
    /// the batch.
    pub async fn handle(&self, event: &KafkaTriggerEvent) -> Result<PersistOutcome> {
        let span = tracing::info_span!(
            "persist",
            invocation_id = %Uuid::new_v4(),
            warehouse = self.sink.warehouse_name()
        );
        self.run(event).instrument(span).await
    }

    async fn run(&self, event: &KafkaTriggerEvent) -> Result<PersistOutcome> {
        if event.is_empty() {
            tracing::info!("No records to persist");
            return Ok(PersistOutcome::NoRecords);
        }

        let rows = event.decode_rows()?;
        match self.sink.persist(&rows).await? {
            SinkState::Idle => Ok(PersistOutcome::NoRecords),
            _ => Ok(PersistOutcome::Persisted { rows: rows.len() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::{MemoryBus, MemorySecretStore, MemoryWarehouse};
    use crate::types::KafkaTriggerRecord;
    use std::sync::Arc;

    #[test]
    fn test_outcome_messages() {
        assert_eq!(TokenizeOutcome::NoData.to_string(), "No data to insert.");
        assert_eq!(
            TokenizeOutcome::Tokenized {
                records: 2,
                publish: PublishOutcome::Delivered { messages: 2 },
            }
            .to_string(),
            "Successfully processed 2 records."
        );
        assert_eq!(PersistOutcome::NoRecords.to_string(), "No records to persist.");
        assert_eq!(
            PersistOutcome::Persisted { rows: 4 }.to_string(),
            "Successfully processed 4 records."
        );
    }

    #[tokio::test]
    async fn test_no_inserts_skips_secret_read() {
        let secrets = Arc::new(MemorySecretStore::new());
        let bus = Arc::new(MemoryBus::new());
        let stage = TokenizationStage::new(
            CredentialProvider::new(secrets.clone(), "creds"),
            Publisher::new(bus.clone()),
            "http://vault.invalid",
            "persons",
        );

        let event: ChangeStreamEvent = serde_json::from_value(serde_json::json!({
            "Records": [{ "eventName": "REMOVE", "dynamodb": {} }]
        }))
        .unwrap();

        assert_eq!(stage.handle(&event).await.unwrap(), TokenizeOutcome::NoData);
        assert_eq!(secrets.reads(), 0);
        assert_eq!(bus.connect_attempts(), 0);
    }

    #[test]
    fn test_from_config_requires_vault_uri() {
        let config = PipelineConfig::from_pairs([("SECRET_NAME", "creds"), ("TOPIC_NAME", "persons")]).unwrap();
        let credentials = CredentialProvider::new(Arc::new(MemorySecretStore::new()), "creds");
        let publisher = Publisher::new(Arc::new(MemoryBus::new()));

        let err = TokenizationStage::from_config(&config, credentials, publisher)
            .err()
            .unwrap();
        assert!(err.to_string().contains("VAULT_URI"));
    }

    #[tokio::test]
    async fn test_persist_empty_trigger() {
        let warehouse = MemoryWarehouse::new();
        let stage = PersistStage::new(WarehouseSink::new(Arc::new(warehouse.clone())));

        let outcome = stage.handle(&KafkaTriggerEvent::default()).await.unwrap();
        assert_eq!(outcome, PersistOutcome::NoRecords);
        assert_eq!(warehouse.transactions_begun(), 0);
    }

    #[tokio::test]
    async fn test_handle_connecting_skips_connect_for_empty_trigger() {
        let connects = std::sync::atomic::AtomicUsize::new(0);

        let outcome = PersistStage::handle_connecting(&KafkaTriggerEvent::default(), || async {
            connects.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(WarehouseSink::new(Arc::new(MemoryWarehouse::new())))
        })
        .await
        .unwrap();

        assert_eq!(outcome, PersistOutcome::NoRecords);
        assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_connecting_persists_nonempty_trigger() {
        let warehouse = MemoryWarehouse::new();
        let mut event = KafkaTriggerEvent::default();
        event.records.insert(
            "persons-0".to_string(),
            vec![KafkaTriggerRecord::encode("persons", 0, 0, br#"{"skyflow_id":"a"}"#)],
        );

        let sink_warehouse = warehouse.clone();
        let outcome = PersistStage::handle_connecting(&event, || async move {
            Ok(WarehouseSink::new(Arc::new(sink_warehouse)))
        })
        .await
        .unwrap();

        assert_eq!(outcome, PersistOutcome::Persisted { rows: 1 });
        assert_eq!(warehouse.len(), 1);
    }

    #[tokio::test]
    async fn test_handle_connecting_propagates_connect_error() {
        let mut event = KafkaTriggerEvent::default();
        event.records.insert(
            "persons-0".to_string(),
            vec![KafkaTriggerRecord::encode("persons", 0, 0, br#"{"skyflow_id":"a"}"#)],
        );

        let err = PersistStage::handle_connecting(&event, || async {
            Err(crate::error::PipelineError::Credential("store unreachable".to_string()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Credential);
    }

    #[tokio::test]
    async fn test_persist_undecodable_message_opens_no_transaction() {
        let warehouse = MemoryWarehouse::new();
        let stage = PersistStage::new(WarehouseSink::new(Arc::new(warehouse.clone())));

        let mut event = KafkaTriggerEvent::default();
        event.records.insert(
            "persons-0".to_string(),
            vec![KafkaTriggerRecord::encode("persons", 0, 7, b"not json")],
        );

        let err = stage.handle(&event).await.unwrap_err();
        assert!(err.to_string().contains("persons-0@7"));
        assert_eq!(warehouse.transactions_begun(), 0);
    }
}
