//! Transactional batch writes into the warehouse
//!
//! One invocation batch is one transaction. Every row is inserted and
//! committed together, or the transaction is rolled back and the failure
//! is returned so the trigger can redeliver the whole batch.

use crate::error::{PipelineError, Result};
use crate::provider::Warehouse;
use crate::types::WarehouseRow;
use std::fmt;
use std::sync::Arc;

/// Terminal state of one sink invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Empty batch; no transaction was opened
    Idle,
    /// Transaction begun, inserts in progress
    TransactionOpen,
    /// Every insert succeeded and the transaction committed
    Committed,
    /// An insert failed and the transaction was rolled back
    RolledBack,
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::TransactionOpen => "transaction_open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

/// Writes batches of rows through a pluggable warehouse
pub struct WarehouseSink {
    warehouse: Arc<dyn Warehouse>,
}

impl WarehouseSink {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Get the warehouse name
    pub fn warehouse_name(&self) -> &str {
        self.warehouse.name()
    }

    /// Insert `rows` in one transaction
    ///
    /// Returns [`SinkState::Committed`], or [`SinkState::Idle`] for an
    /// empty batch. A failed insert rolls the transaction back and the
    /// persist error is returned.
    pub async fn persist(&self, rows: &[WarehouseRow]) -> Result<SinkState> {
        if rows.is_empty() {
            return Ok(SinkState::Idle);
        }

        let mut tx = self.warehouse.begin().await?;
        let mut state = SinkState::TransactionOpen;
        tracing::debug!(warehouse = self.warehouse.name(), rows = rows.len(), %state, "Batch started");

        let mut failure = None;
        for row in rows {
            if let Err(e) = tx.insert(row).await {
                failure = Some(e);
                break;
            }
            tracing::debug!(skyflow_id = %row.skyflow_id, "Row inserted");
        }

        if let Some(error) = failure {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(error = %rollback_error, "Rollback failed");
            }
            state = SinkState::RolledBack;
            tracing::warn!(rows = rows.len(), %state, error = %error, "Batch rolled back");
            return Err(into_persist(error));
        }

        tx.commit().await?;
        state = SinkState::Committed;
        tracing::info!(
            warehouse = self.warehouse.name(),
            rows = rows.len(),
            %state,
            "Batch committed"
        );

        Ok(state)
    }
}

fn into_persist(error: PipelineError) -> PipelineError {
    match error {
        PipelineError::Persist { .. } => error,
        other => PipelineError::persist(None, other.to_string()),
    }
}
