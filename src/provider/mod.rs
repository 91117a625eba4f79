//! Backend traits at the seams to the secret store, message bus, and warehouse
//!
//! Each external service the pipeline talks to is reached through one of
//! these traits. Real backends (AWS Secrets Manager, Kafka, Postgres) and
//! in-memory backends for tests implement them interchangeably.

use crate::error::Result;
use crate::types::{BusMessage, WarehouseRow};
use async_trait::async_trait;

pub mod aws;
pub mod kafka;
pub mod memory;
pub mod postgres;

/// Read-only access to a secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the secret string stored under `secret_id`
    ///
    /// Fails with a credential error when the store is unreachable or the
    /// secret has no string value.
    async fn get_secret(&self, secret_id: &str) -> Result<String>;

    /// Store name (e.g., "aws-secrets-manager", "memory")
    fn name(&self) -> &str;
}

/// Producer side of the message bus
///
/// A publish is one bounded unit of work: `connect`, `send_batch`,
/// `disconnect`. Producers may be reconnected after a disconnect.
#[async_trait]
pub trait BusProducer: Send + Sync {
    /// Establish a connection to the brokers
    async fn connect(&self) -> Result<()>;

    /// Send every message to `topic`, returning the number delivered
    async fn send_batch(&self, topic: &str, messages: &[BusMessage]) -> Result<usize>;

    /// Flush and release the connection
    async fn disconnect(&self) -> Result<()>;

    /// Producer name (e.g., "kafka", "memory")
    fn name(&self) -> &str;
}

/// A warehouse that can open batch transactions
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Open a transaction holding one connection
    async fn begin(&self) -> Result<Box<dyn WarehouseTransaction>>;

    /// Warehouse name (e.g., "postgres", "memory")
    fn name(&self) -> &str;
}

/// An open warehouse transaction
///
/// Dropping a transaction without committing discards its writes and
/// releases its connection.
#[async_trait]
pub trait WarehouseTransaction: Send {
    /// Insert one row with a parameterized statement
    async fn insert(&mut self, row: &WarehouseRow) -> Result<()>;

    /// Commit every insert made in this transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every insert made in this transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}
