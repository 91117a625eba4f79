//! Best-effort relay of tokenized records onto the message bus
//!
//! `Publisher` wraps any `BusProducer` and runs one publish as a bounded
//! unit of work: connect, send the batch, disconnect. Failures are
//! reported as a [`PublishOutcome`] rather than an error. Vault writes
//! made before the publish are not undone.

use crate::config::CONNECT_TIMEOUT;
use crate::error::{PipelineError, Result};
use crate::provider::BusProducer;
use crate::types::{BusMessage, TokenizedRecord};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Added to [`CONNECT_TIMEOUT`]; the producer's own bound must expire first
const CONNECT_GRACE: Duration = Duration::from_millis(500);

/// Attempt budget for one publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,

    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Result of one publish
///
/// A failed publish leaves the batch in an unknown delivery state: some
/// messages may have reached the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing to send; no connection was made
    Empty,
    /// Every message was acknowledged
    Delivered { messages: usize },
    /// The brokers could not be reached
    ConnectFailed { reason: String },
    /// Connected, but the batch was not fully delivered
    SendFailed { reason: String },
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Empty)
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "No data to insert."),
            Self::Delivered { messages } => write!(f, "Successfully processed {} records.", messages),
            Self::ConnectFailed { .. } => write!(f, "Failed to connect to brokers."),
            Self::SendFailed { .. } => write!(f, "Failed to send messages."),
        }
    }
}

/// Publishes tokenized records through a pluggable bus producer
pub struct Publisher {
    producer: Arc<dyn BusProducer>,
    retry: RetryPolicy,
    connect_timeout: Duration,
}

impl Publisher {
    pub fn new(producer: Arc<dyn BusProducer>) -> Self {
        Self {
            producer,
            retry: RetryPolicy::default(),
            connect_timeout: CONNECT_TIMEOUT + CONNECT_GRACE,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upper bound on one `connect`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Get the producer name
    pub fn producer_name(&self) -> &str {
        self.producer.name()
    }

    /// Send one message per record to `topic`
    pub async fn publish(&self, topic: &str, records: &[TokenizedRecord]) -> PublishOutcome {
        if records.is_empty() {
            return PublishOutcome::Empty;
        }

        let messages = match records.iter().map(BusMessage::from_record).collect::<Result<Vec<_>>>() {
            Ok(messages) => messages,
            Err(e) => return PublishOutcome::SendFailed { reason: e.to_string() },
        };

        let attempts = self.retry.max_attempts.max(1);
        let mut outcome = PublishOutcome::Empty;

        for attempt in 1..=attempts {
            outcome = self.attempt(topic, &messages).await;
            match outcome {
                PublishOutcome::Delivered { messages } => {
                    tracing::info!(
                        topic = %topic,
                        messages,
                        attempt,
                        producer = self.producer.name(),
                        "Batch published"
                    );
                    return outcome;
                }
                PublishOutcome::ConnectFailed { ref reason } | PublishOutcome::SendFailed { ref reason } => {
                    tracing::warn!(
                        topic = %topic,
                        attempt,
                        max_attempts = attempts,
                        reason = %reason,
                        "Publish attempt failed"
                    );
                }
                PublishOutcome::Empty => {}
            }

            if attempt < attempts && !self.retry.backoff.is_zero() {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }

        outcome
    }

    async fn attempt(&self, topic: &str, messages: &[BusMessage]) -> PublishOutcome {
        let connected = tokio::time::timeout(self.connect_timeout, self.producer.connect())
            .await
            .unwrap_or_else(|_| {
                Err(PipelineError::Timeout(format!(
                    "connect did not finish within {:?}",
                    self.connect_timeout
                )))
            });

        if let Err(e) = connected {
            self.release().await;
            return PublishOutcome::ConnectFailed { reason: e.to_string() };
        }

        let outcome = match self.producer.send_batch(topic, messages).await {
            Ok(messages) => PublishOutcome::Delivered { messages },
            Err(e) => PublishOutcome::SendFailed { reason: e.to_string() },
        };

        self.release().await;
        outcome
    }

    async fn release(&self) {
        if let Err(e) = self.producer.disconnect().await {
            tracing::warn!(producer = self.producer.name(), error = %e, "Disconnect failed");
        }
    }
}
