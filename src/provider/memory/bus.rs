use crate::error::{PipelineError, Result};
use crate::provider::BusProducer;
use crate::types::BusMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// In-memory message bus
///
/// Messages are appended per topic. Upcoming connects or sends can be
/// made to fail to exercise retry and failure reporting.
#[derive(Default)]
pub struct MemoryBus {
    topics: RwLock<HashMap<String, Vec<BusMessage>>>,
    connected: AtomicBool,
    connect_attempts: AtomicUsize,
    send_attempts: AtomicUsize,
    failing_connects: AtomicUsize,
    failing_sends: AtomicUsize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connect attempts
    pub fn fail_next_connects(&self, n: usize) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` send attempts
    pub fn fail_next_sends(&self, n: usize) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Messages delivered to `topic`, in send order
    pub fn messages(&self, topic: &str) -> Vec<BusMessage> {
        self.topics
            .read()
            .map(|topics| topics.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Consume one pending injected failure, if any
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BusProducer for MemoryBus {
    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if take_failure(&self.failing_connects) {
            return Err(PipelineError::Connection(
                "memory bus: injected connect failure".to_string(),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_batch(&self, topic: &str, messages: &[BusMessage]) -> Result<usize> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.is_connected() {
            return Err(PipelineError::Connection("memory bus: not connected".to_string()));
        }

        if take_failure(&self.failing_sends) {
            return Err(PipelineError::Publish {
                topic: topic.to_string(),
                reason: "memory bus: injected send failure".to_string(),
            });
        }

        let mut topics = self.topics.write().map_err(|e| PipelineError::Publish {
            topic: topic.to_string(),
            reason: format!("Failed to acquire topic lock: {}", e),
        })?;
        topics
            .entry(topic.to_string())
            .or_default()
            .extend_from_slice(messages);

        Ok(messages.len())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
