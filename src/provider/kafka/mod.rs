//! Kafka bus producer
//!
//! Implements `BusProducer` using librdkafka through `rdkafka`, with a
//! bounded connect timeout and bounded send retries.

mod config;
mod producer;

pub use config::KafkaConfig;
pub use producer::{ensure_topic, KafkaProducer};

use crate::error::Result;
use crate::provider::BusProducer;
use crate::types::BusMessage;
use async_trait::async_trait;

#[async_trait]
impl BusProducer for KafkaProducer {
    async fn connect(&self) -> Result<()> {
        KafkaProducer::connect(self).await
    }

    async fn send_batch(&self, topic: &str, messages: &[BusMessage]) -> Result<usize> {
        KafkaProducer::send_batch(self, topic, messages).await
    }

    async fn disconnect(&self) -> Result<()> {
        KafkaProducer::disconnect(self).await
    }

    fn name(&self) -> &str {
        "kafka"
    }
}
