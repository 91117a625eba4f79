use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vault_relay::provider::kafka::ensure_topic;
use vault_relay::{
    AwsSecretsManager, ChangeStreamEvent, CredentialProvider, KafkaConfig, KafkaProducer,
    KafkaTriggerEvent, PersistStage, PipelineConfig, PostgresWarehouse, Publisher,
    TokenizationStage, WarehouseSink,
};

/// Change-stream tokenization relay
#[derive(Debug, Parser)]
#[command(name = "vault-relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Tokenize the insert events of a change-stream batch and publish them
    Tokenize {
        /// Path to the change-stream event JSON
        event: PathBuf,
    },
    /// Persist a batch of bus messages into the warehouse
    Persist {
        /// Path to the bus trigger event JSON
        event: PathBuf,
    },
    /// Create the configured topic if it does not exist
    CreateTopic {
        /// Number of partitions
        #[arg(long, default_value_t = 1)]
        partitions: i32,
        /// Replication factor
        #[arg(long, default_value_t = 2)]
        replication: i32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;

    match cli.command {
        Commands::Tokenize { event } => tokenize(&config, &event).await?,
        Commands::Persist { event } => persist(&config, &event).await?,
        Commands::CreateTopic {
            partitions,
            replication,
        } => {
            let topic = config.require_topic_name()?;
            ensure_topic(&KafkaConfig::from_pipeline(&config), topic, partitions, replication)
                .await?;
        }
    }

    Ok(())
}

async fn read_event<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn credential_provider(config: &PipelineConfig) -> vault_relay::Result<CredentialProvider> {
    let store = AwsSecretsManager::connect(config.require_region()?).await;
    let mut provider = CredentialProvider::new(Arc::new(store), config.require_secret_name()?);
    if let Some(key) = config.secret_key.as_deref().filter(|k| !k.is_empty()) {
        provider = provider.with_secret_key(key);
    }
    Ok(provider)
}

async fn tokenize(config: &PipelineConfig, path: &Path) -> anyhow::Result<()> {
    let event: ChangeStreamEvent = read_event(path).await?;

    let producer = KafkaProducer::new(KafkaConfig::from_pipeline(config));
    let publisher = Publisher::new(Arc::new(producer));
    let stage = TokenizationStage::from_config(config, credential_provider(config).await?, publisher)?;

    let outcome = stage.handle(&event).await?;
    println!("{}", outcome);
    Ok(())
}

async fn persist(config: &PipelineConfig, path: &Path) -> anyhow::Result<()> {
    config.validate_persist()?;
    let event: KafkaTriggerEvent = read_event(path).await?;

    let outcome = PersistStage::handle_connecting(&event, || async {
        let credentials = credential_provider(config).await?.fetch_database().await?;
        let warehouse = PostgresWarehouse::connect(&credentials, config.require_db_name()?).await?;
        Ok(WarehouseSink::new(Arc::new(warehouse)))
    })
    .await?;
    println!("{}", outcome);
    Ok(())
}
