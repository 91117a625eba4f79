use crate::config::{PipelineConfig, CONNECT_TIMEOUT, PRODUCER_RETRIES};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Kafka producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses
    pub brokers: Vec<String>,

    /// Client id reported to the brokers
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Connection-establishment and authentication timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Producer send retries
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Upper bound on one message's delivery, retries included, in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Additional librdkafka properties (pass-through)
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

fn default_client_id() -> String {
    "SkyflowDemo".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT.as_millis() as u64
}

fn default_retries() -> u32 {
    PRODUCER_RETRIES
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec![String::new()],
            client_id: default_client_id(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retries: default_retries(),
            message_timeout_ms: default_message_timeout_ms(),
            properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Derive producer settings from the pipeline configuration
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            brokers: config.brokers(),
            client_id: config.kafka_client_id.clone(),
            ..Default::default()
        }
    }

    /// Brokers joined into a `bootstrap.servers` value
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    /// Build the librdkafka client configuration
    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("client.id", &self.client_id)
            .set(
                "socket.connection.setup.timeout.ms",
                self.connect_timeout_ms.to_string(),
            )
            .set("message.send.max.retries", self.retries.to_string())
            .set("message.timeout.ms", self.message_timeout_ms.to_string());

        for (key, value) in &self.properties {
            client.set(key, value);
        }

        client
    }
}
