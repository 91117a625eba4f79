use crate::error::{PipelineError, Result};
use crate::provider::{Warehouse, WarehouseTransaction};
use crate::types::WarehouseRow;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

type Table = Arc<RwLock<BTreeMap<String, WarehouseRow>>>;

/// In-memory `persons` table keyed by `skyflow_id`
///
/// Clones share the same table, so a test can hand one clone to the
/// sink and inspect the other.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    table: Table,
    fail_on_insert: Option<usize>,
    transactions: Arc<AtomicUsize>,
    open_connections: Arc<AtomicUsize>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`th insert (1-based) of every transaction
    pub fn with_failure_on_insert(mut self, n: usize) -> Self {
        self.fail_on_insert = Some(n);
        self
    }

    /// Committed rows ordered by `skyflow_id`
    pub fn rows(&self) -> Vec<WarehouseRow> {
        self.table
            .read()
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table.read().map(|table| table.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transactions opened so far
    pub fn transactions_begun(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Number of transactions currently holding a connection
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn begin(&self) -> Result<Box<dyn WarehouseTransaction>> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.open_connections.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryTransaction {
            table: Arc::clone(&self.table),
            staged: Vec::new(),
            inserts: 0,
            fail_on_insert: self.fail_on_insert,
            open_connections: Arc::clone(&self.open_connections),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryTransaction {
    table: Table,
    staged: Vec<WarehouseRow>,
    inserts: usize,
    fail_on_insert: Option<usize>,
    open_connections: Arc<AtomicUsize>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WarehouseTransaction for MemoryTransaction {
    async fn insert(&mut self, row: &WarehouseRow) -> Result<()> {
        self.inserts += 1;

        if self.fail_on_insert == Some(self.inserts) {
            return Err(PipelineError::persist(
                Some(&row.skyflow_id),
                format!("injected failure on insert {}", self.inserts),
            ));
        }

        let exists = self
            .table
            .read()
            .map_err(|e| PipelineError::persist(None, format!("table lock poisoned: {}", e)))?
            .contains_key(&row.skyflow_id);

        if exists || self.staged.iter().any(|r| r.skyflow_id == row.skyflow_id) {
            return Err(PipelineError::persist(
                Some(&row.skyflow_id),
                "duplicate key value violates primary key \"persons_pkey\"",
            ));
        }

        self.staged.push(row.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let staged = std::mem::take(&mut this.staged);
        let mut table = this
            .table
            .write()
            .map_err(|e| PipelineError::persist(None, format!("table lock poisoned: {}", e)))?;

        for row in staged {
            table.insert(row.skyflow_id.clone(), row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.staged.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> WarehouseRow {
        WarehouseRow {
            skyflow_id: id.to_string(),
            name: Some(format!("tok-name-{}", id)),
            street_address: None,
            state: None,
            city: None,
            zip_code: None,
        }
    }

    #[tokio::test]
    async fn test_commit_applies_rows() {
        let warehouse = MemoryWarehouse::new();
        let mut tx = warehouse.begin().await.unwrap();
        tx.insert(&row("a")).await.unwrap();
        tx.insert(&row("b")).await.unwrap();

        assert!(warehouse.is_empty());
        assert_eq!(warehouse.open_connections(), 1);

        tx.commit().await.unwrap();
        assert_eq!(warehouse.len(), 2);
        assert_eq!(warehouse.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_rows() {
        let warehouse = MemoryWarehouse::new();
        let mut tx = warehouse.begin().await.unwrap();
        tx.insert(&row("a")).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(warehouse.is_empty());
        assert_eq!(warehouse.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let warehouse = MemoryWarehouse::new();
        {
            let mut tx = warehouse.begin().await.unwrap();
            tx.insert(&row("a")).await.unwrap();
        }
        assert!(warehouse.is_empty());
        assert_eq!(warehouse.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let warehouse = MemoryWarehouse::new();
        let mut tx = warehouse.begin().await.unwrap();
        tx.insert(&row("a")).await.unwrap();

        let err = tx.insert(&row("a")).await.unwrap_err();
        assert!(err.to_string().contains("persons_pkey"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let warehouse = MemoryWarehouse::new().with_failure_on_insert(2);
        let mut tx = warehouse.begin().await.unwrap();
        tx.insert(&row("a")).await.unwrap();
        assert!(tx.insert(&row("b")).await.is_err());
    }
}
