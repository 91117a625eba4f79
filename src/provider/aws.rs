//! AWS Secrets Manager secret store

use crate::error::{PipelineError, Result};
use crate::provider::SecretStore;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};

/// Secret store backed by AWS Secrets Manager
pub struct AwsSecretsManager {
    client: aws_sdk_secretsmanager::Client,
    region: String,
}

impl AwsSecretsManager {
    /// Build a client for `region` using the default credential chain
    pub async fn connect(region: impl Into<String>) -> Self {
        let region = region.into();
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        tracing::debug!(region = %region, "Secrets Manager client ready");

        Self {
            client: aws_sdk_secretsmanager::Client::new(&sdk_config),
            region,
        }
    }

    /// Wrap an already-configured client
    pub fn from_client(client: aws_sdk_secretsmanager::Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl SecretStore for AwsSecretsManager {
    async fn get_secret(&self, secret_id: &str) -> Result<String> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Credential(format!(
                    "Failed to read secret '{}' in {}: {}",
                    secret_id,
                    self.region,
                    aws_sdk_secretsmanager::error::DisplayErrorContext(&e)
                ))
            })?;

        output.secret_string().map(str::to_string).ok_or_else(|| {
            PipelineError::Credential(format!("Secret '{}' has no string value", secret_id))
        })
    }

    fn name(&self) -> &str {
        "aws-secrets-manager"
    }
}
