//! Postgres-protocol warehouse (Postgres, Redshift)

use crate::credential::DatabaseCredentials;
use crate::error::{PipelineError, Result};
use crate::provider::{Warehouse, WarehouseTransaction};
use crate::types::WarehouseRow;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

const INSERT_PERSON: &str = "INSERT INTO persons(skyflow_id, name, street_address, state, city, zip_code) \
                             VALUES($1, $2, $3, $4, $5, $6)";

/// Warehouse reached over the Postgres wire protocol
///
/// The pool holds at most one connection: a sink invocation runs one
/// transaction at a time.
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    /// Connect using credentials from the secret store and a database name
    pub async fn connect(credentials: &DatabaseCredentials, database: &str) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&credentials.host)
            .port(credentials.port)
            .username(&credentials.username)
            .password(&credentials.password)
            .database(database);

        // Avoid logging the connect options: they carry the password.
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                PipelineError::persist(
                    None,
                    format!(
                        "Failed to connect to {}:{}/{}: {}",
                        credentials.host, credentials.port, database, e
                    ),
                )
            })?;

        tracing::info!(
            host = %credentials.host,
            port = credentials.port,
            database = %database,
            "Connected to warehouse"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn begin(&self) -> Result<Box<dyn WarehouseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::persist(None, format!("BEGIN failed: {}", e)))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// An open transaction; sqlx rolls back on drop if neither commit nor
/// rollback ran
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WarehouseTransaction for PostgresTransaction {
    async fn insert(&mut self, row: &WarehouseRow) -> Result<()> {
        sqlx::query(INSERT_PERSON)
            .bind(&row.skyflow_id)
            .bind(&row.name)
            .bind(&row.street_address)
            .bind(&row.state)
            .bind(&row.city)
            .bind(&row.zip_code)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| PipelineError::persist(Some(&row.skyflow_id), e.to_string()))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| PipelineError::persist(None, format!("COMMIT failed: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| PipelineError::persist(None, format!("ROLLBACK failed: {}", e)))
    }
}
