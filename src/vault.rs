//! Vault tokenization exchange

use crate::auth::BearerToken;
use crate::error::{PipelineError, Result};
use crate::types::{PersonRecord, TokenizedRecord};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct InsertRequest<'a> {
    quorum: bool,
    records: Vec<InsertRecord<'a>>,
    tokenization: bool,
}

#[derive(Debug, Serialize)]
struct InsertRecord<'a> {
    fields: &'a PersonRecord,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    records: Option<Vec<ResponseRecord>>,
}

#[derive(Debug, Deserialize)]
struct ResponseRecord {
    #[serde(default)]
    skyflow_id: Option<String>,
    #[serde(default)]
    tokens: BTreeMap<String, String>,
}

/// Exchanges plaintext person records for vault tokens
///
/// One batch is one HTTP request: either every record is tokenized or
/// the call fails.
#[derive(Clone)]
pub struct VaultTokenizer {
    http: reqwest::Client,
}

impl VaultTokenizer {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Tokenize `records` into `entity` at the vault behind `vault_url`
    ///
    /// An empty batch returns without a request.
    pub async fn tokenize(
        &self,
        vault_url: &str,
        bearer: &BearerToken,
        entity: &str,
        records: &[PersonRecord],
    ) -> Result<Vec<TokenizedRecord>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let url = entity_url(vault_url, entity);
        let request = InsertRequest {
            quorum: false,
            records: records.iter().map(|fields| InsertRecord { fields }).collect(),
            tokenization: true,
        };

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, bearer.header_value())
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Vault(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::VaultRejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: InsertResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Vault(format!("Malformed vault response: {}", e)))?;

        let tokenized = into_tokenized(parsed, records.len())?;

        tracing::info!(entity = %entity, records = tokenized.len(), "Records tokenized");
        for record in &tokenized {
            tracing::debug!(skyflow_id = %record.skyflow_id, "Tokenized record");
        }

        Ok(tokenized)
    }
}

fn entity_url(vault_url: &str, entity: &str) -> String {
    format!("{}/{}", vault_url.trim_end_matches('/'), entity)
}

fn into_tokenized(response: InsertResponse, submitted: usize) -> Result<Vec<TokenizedRecord>> {
    let records = response
        .records
        .ok_or_else(|| PipelineError::Vault("Response is missing 'records'".to_string()))?;

    if records.len() != submitted {
        return Err(PipelineError::Vault(format!(
            "Submitted {} records but the vault returned {}",
            submitted,
            records.len()
        )));
    }

    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| match record.skyflow_id {
            Some(id) if !id.is_empty() => Ok(TokenizedRecord::from_tokens(id, &record.tokens)),
            _ => Err(PipelineError::Vault(format!(
                "Response record {} has no skyflow_id",
                i
            ))),
        })
        .collect()
}
