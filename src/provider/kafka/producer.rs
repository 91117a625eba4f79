//! Kafka producer: connect, send, flush, provision

use super::config::KafkaConfig;
use crate::error::{PipelineError, Result};
use crate::types::BusMessage;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Kafka producer
///
/// `connect` creates the librdkafka producer and checks that the brokers
/// answer a metadata request within the connect timeout. `disconnect`
/// flushes outstanding messages and drops the producer.
pub struct KafkaProducer {
    /// Live producer between connect and disconnect
    producer: Mutex<Option<FutureProducer>>,

    /// Configuration
    config: Arc<KafkaConfig>,
}

impl KafkaProducer {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            producer: Mutex::new(None),
            config: Arc::new(config),
        }
    }

    /// Create the producer and wait for broker metadata
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.producer.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let producer: FutureProducer = self.config.client_config().create().map_err(|e| {
            PipelineError::Connection(format!("{}: {}", self.config.bootstrap_servers(), e))
        })?;

        let metadata_client = producer.clone();
        let timeout = self.config.connect_timeout();
        tokio::task::spawn_blocking(move || {
            metadata_client.client().fetch_metadata(None, timeout).map(|_| ())
        })
            .await
            .map_err(|e| PipelineError::Connection(format!("metadata request aborted: {}", e)))?
            .map_err(|e| {
                PipelineError::Connection(format!(
                    "{}: brokers did not answer within {:?}: {}",
                    self.config.bootstrap_servers(),
                    timeout,
                    e
                ))
            })?;

        tracing::info!(
            brokers = %self.config.bootstrap_servers(),
            client_id = %self.config.client_id,
            "Connected to Kafka"
        );

        *slot = Some(producer);
        Ok(())
    }

    /// Send every message and wait for all delivery reports
    pub async fn send_batch(&self, topic: &str, messages: &[BusMessage]) -> Result<usize> {
        let producer = self
            .producer
            .lock()
            .await
            .clone()
            .ok_or_else(|| PipelineError::Connection("Kafka producer is not connected".to_string()))?;

        let timeout = Timeout::After(self.config.message_timeout());
        let deliveries = messages.iter().map(|message| {
            let mut record = FutureRecord::<str, [u8]>::to(topic).payload(message.payload.as_slice());
            if let Some(ref key) = message.key {
                record = record.key(key.as_str());
            }
            producer.send(record, timeout)
        });

        let results = futures::future::join_all(deliveries).await;

        let mut delivered = 0;
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(_) => delivered += 1,
                Err((e, _)) => failures.push(e.to_string()),
            }
        }

        if !failures.is_empty() {
            return Err(PipelineError::Publish {
                topic: topic.to_string(),
                reason: format!(
                    "{} of {} messages failed: {}",
                    failures.len(),
                    messages.len(),
                    failures[0]
                ),
            });
        }

        tracing::debug!(topic = %topic, delivered, "Batch delivered");
        Ok(delivered)
    }

    /// Flush outstanding messages and drop the producer
    pub async fn disconnect(&self) -> Result<()> {
        let Some(producer) = self.producer.lock().await.take() else {
            return Ok(());
        };

        let timeout = self.config.message_timeout();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| PipelineError::Connection(format!("flush aborted: {}", e)))?
            .map_err(|e| PipelineError::Connection(format!("flush failed: {}", e)))?;

        tracing::debug!(brokers = %self.config.bootstrap_servers(), "Disconnected from Kafka");
        Ok(())
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }
}

/// Create `topic` if it does not exist
///
/// An already-existing topic counts as success.
pub async fn ensure_topic(
    config: &KafkaConfig,
    topic: &str,
    partitions: i32,
    replication: i32,
) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = config.client_config().create().map_err(|e| {
        PipelineError::Connection(format!("{}: {}", config.bootstrap_servers(), e))
    })?;

    let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replication));
    let options = AdminOptions::new().operation_timeout(Some(config.message_timeout()));

    let results = admin
        .create_topics(&[new_topic], &options)
        .await
        .map_err(|e| PipelineError::Config(format!("Failed to create topic '{}': {}", topic, e)))?;

    for result in results {
        match result {
            Ok(name) => {
                tracing::info!(topic = %name, partitions, replication, "Topic created");
            }
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::info!(topic = %name, "Topic already exists");
            }
            Err((name, code)) => {
                return Err(PipelineError::Config(format!(
                    "Failed to create topic '{}': {}",
                    name, code
                )));
            }
        }
    }

    Ok(())
}
