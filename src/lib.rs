//! # vault-relay
//!
//! Moves personal records from a change stream through a tokenization
//! vault, onto a message bus, and into a transactional warehouse table.
//!
//! ## Overview
//!
//! Two independently triggered stages:
//!
//! - **Tokenization**: insert events from the change stream are flattened
//!   into person records, exchanged with the vault for tokens using a
//!   bearer token minted from a service-account credential, and relayed
//!   to a bus topic. Publishing is best effort: vault writes stand even
//!   if the relay fails.
//! - **Persist**: a batch of bus messages is decoded and written to the
//!   warehouse in one transaction that commits fully or rolls back.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use vault_relay::{KafkaTriggerEvent, KafkaTriggerRecord, PersistStage, WarehouseSink};
//! use vault_relay::provider::memory::MemoryWarehouse;
//!
//! # async fn example() -> vault_relay::Result<()> {
//! let warehouse = MemoryWarehouse::new();
//! let stage = PersistStage::new(WarehouseSink::new(Arc::new(warehouse.clone())));
//!
//! let mut event = KafkaTriggerEvent::default();
//! event.records.insert(
//!     "persons-0".to_string(),
//!     vec![KafkaTriggerRecord::encode("persons", 0, 0, br#"{"skyflow_id":"a"}"#)],
//! );
//!
//! let outcome = stage.handle(&event).await?;
//! println!("{}", outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **aws**: AWS Secrets Manager secret store
//! - **kafka**: Kafka producer and topic provisioning
//! - **postgres**: Postgres-protocol warehouse
//! - **memory**: in-process secret store, bus, and warehouse for tests

pub mod auth;
pub mod capture;
pub mod config;
pub mod credential;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod publisher;
pub mod sink;
pub mod types;
pub mod vault;

// Re-export core types
pub use auth::{AuthTokenIssuer, BearerToken, CachedToken, Claims, SignedAssertion, TokenCache};
pub use capture::capture;
pub use config::{PipelineConfig, TransformPolicy};
pub use credential::{Credential, CredentialProvider, DatabaseCredentials};
pub use error::{ErrorKind, PipelineError, Result};
pub use pipeline::{PersistOutcome, PersistStage, TokenizationStage, TokenizeOutcome};
pub use provider::{BusProducer, SecretStore, Warehouse, WarehouseTransaction};
pub use publisher::{PublishOutcome, Publisher, RetryPolicy};
pub use sink::{SinkState, WarehouseSink};
pub use types::{
    AttributeValue, BusMessage, ChangeStreamEvent, EventName, KafkaTriggerEvent,
    KafkaTriggerRecord, PersonRecord, RawChangeEvent, TokenizedRecord, WarehouseRow,
};
pub use vault::VaultTokenizer;

// Re-export providers for convenience
pub use provider::aws::AwsSecretsManager;
pub use provider::kafka::{KafkaConfig, KafkaProducer};
pub use provider::memory::{MemoryBus, MemorySecretStore, MemoryWarehouse};
pub use provider::postgres::PostgresWarehouse;
