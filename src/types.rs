//! Core record types for the vault-relay pipeline
//!
//! Change-stream types mirror the stream's own JSON (PascalCase keys,
//! one-letter type tags). Record types use snake_case for wire
//! compatibility with the vault and the warehouse table.

use crate::error::{PipelineError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ─── Change stream ───────────────────────────────────────────────

/// A batch of change-stream entries delivered to one invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeStreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<RawChangeEvent>,
}

/// Kind of row-level change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventName {
    Insert,
    Modify,
    Remove,
    #[serde(other)]
    Unknown,
}

/// One entry from the change stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChangeEvent {
    /// Stream-assigned event identifier
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub event_name: EventName,

    /// Typed row images
    #[serde(default)]
    pub dynamodb: StreamRecord,
}

impl RawChangeEvent {
    /// Whether this event is admitted downstream
    pub fn is_insert(&self) -> bool {
        self.event_name == EventName::Insert
    }
}

/// Row images carried by a change event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<HashMap<String, AttributeValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<HashMap<String, AttributeValue>>,
}

/// A value from a typed row image, nested under a one-letter type tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "B")]
    Binary(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "M")]
    Map(HashMap<String, AttributeValue>),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
}

impl AttributeValue {
    /// The one-letter (or short) tag this value was nested under
    pub fn tag(&self) -> &'static str {
        match self {
            Self::String(_) => "S",
            Self::Number(_) => "N",
            Self::Binary(_) => "B",
            Self::Bool(_) => "BOOL",
            Self::Null(_) => "NULL",
            Self::Map(_) => "M",
            Self::List(_) => "L",
            Self::StringSet(_) => "SS",
            Self::NumberSet(_) => "NS",
            Self::BinarySet(_) => "BS",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Unwrap a string-tagged field from a typed row image
///
/// Fails with a transform error if the field is absent or carries a tag
/// other than `S`.
pub fn extract_string(
    image: &HashMap<String, AttributeValue>,
    field: &str,
    event_id: Option<&str>,
) -> Result<String> {
    let value = image
        .get(field)
        .ok_or_else(|| PipelineError::transform(event_id, field, "field is absent"))?;

    value.as_str().map(str::to_string).ok_or_else(|| {
        PipelineError::transform(
            event_id,
            field,
            format!("expected tag 'S', found '{}'", value.tag()),
        )
    })
}

// ─── Records ─────────────────────────────────────────────────────

/// Canonical flattened person record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub name: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

impl PersonRecord {
    /// Build a record from a typed row image
    pub fn from_image(
        image: &HashMap<String, AttributeValue>,
        event_id: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            name: extract_string(image, "name", event_id)?,
            street_address: extract_string(image, "street_address", event_id)?,
            city: extract_string(image, "city", event_id)?,
            state: extract_string(image, "state", event_id)?,
            zip_code: extract_string(image, "zip_code", event_id)?,
        })
    }
}

/// A record after vault exchange: the vault id plus one token per field
///
/// Token fields the vault did not return are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedRecord {
    pub skyflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
}

impl TokenizedRecord {
    /// Build from a vault id and its token map, ignoring non-person keys
    pub fn from_tokens(skyflow_id: impl Into<String>, tokens: &BTreeMap<String, String>) -> Self {
        let token = |key: &str| tokens.get(key).cloned();
        Self {
            skyflow_id: skyflow_id.into(),
            name: token("name"),
            street_address: token("street_address"),
            city: token("city"),
            state: token("state"),
            zip_code: token("zip_code"),
        }
    }
}

/// A single serialized record on the message bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Optional partition key
    pub key: Option<String>,

    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Serialize a tokenized record into a keyless bus message
    pub fn from_record(record: &TokenizedRecord) -> Result<Self> {
        Ok(Self {
            key: None,
            payload: serde_json::to_vec(record)?,
        })
    }

    /// Decode the payload back into a tokenized record
    pub fn decode(&self) -> Result<TokenizedRecord> {
        serde_json::from_slice(&self.payload).map_err(Into::into)
    }
}

/// Persisted form of a tokenized record, keyed by `skyflow_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRow {
    pub skyflow_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
}

impl From<TokenizedRecord> for WarehouseRow {
    fn from(record: TokenizedRecord) -> Self {
        Self {
            skyflow_id: record.skyflow_id,
            name: record.name,
            street_address: record.street_address,
            state: record.state,
            city: record.city,
            zip_code: record.zip_code,
        }
    }
}

// ─── Bus trigger ─────────────────────────────────────────────────

/// A batch of bus messages delivered to the persist stage
///
/// Records are grouped by `<topic>-<partition>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KafkaTriggerEvent {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "eventSource")]
    pub event_source: Option<String>,

    #[serde(default)]
    pub records: BTreeMap<String, Vec<KafkaTriggerRecord>>,
}

/// One bus message as delivered by the trigger, value base64-encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaTriggerRecord {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub partition: i32,
    #[serde(default)]
    pub offset: i64,
    pub value: String,
}

impl KafkaTriggerRecord {
    /// Build a trigger record carrying a base64-encoded payload
    pub fn encode(topic: impl Into<String>, partition: i32, offset: i64, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            value: BASE64.encode(payload),
        }
    }

    /// Decode the base64 value into a warehouse row
    pub fn decode_row(&self) -> Result<WarehouseRow> {
        let bytes = BASE64.decode(&self.value).map_err(|e| {
            PipelineError::Decode(format!(
                "Invalid base64 value at {}-{}@{}: {}",
                self.topic, self.partition, self.offset, e
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::Decode(format!(
                "Invalid row payload at {}-{}@{}: {}",
                self.topic, self.partition, self.offset, e
            ))
        })
    }
}

impl KafkaTriggerEvent {
    /// Total number of messages across all partitions
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode every message, flattening partitions in key order
    pub fn decode_rows(&self) -> Result<Vec<WarehouseRow>> {
        self.records
            .values()
            .flat_map(|records| records.iter())
            .map(KafkaTriggerRecord::decode_row)
            .collect()
    }
}
