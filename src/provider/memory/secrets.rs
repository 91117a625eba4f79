use crate::error::{PipelineError, Result};
use crate::provider::SecretStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// In-memory secret store
///
/// Counts reads so tests can assert whether the store was consulted.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
    reads: AtomicUsize,
    unreachable: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a secret string under `secret_id`
    pub fn insert(&self, secret_id: impl Into<String>, secret: impl Into<String>) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(secret_id.into(), secret.into());
        }
    }

    /// Simulate an unreachable store
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of `get_secret` calls so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, secret_id: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PipelineError::Credential(format!(
                "Secret store unreachable while reading '{}'",
                secret_id
            )));
        }

        let secrets = self.secrets.read().map_err(|e| {
            PipelineError::Credential(format!("Failed to acquire secret lock: {}", e))
        })?;

        secrets.get(secret_id).cloned().ok_or_else(|| {
            PipelineError::Credential(format!("Secret '{}' not found", secret_id))
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
