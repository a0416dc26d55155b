//! 线上事件格式（OutboxEvent）
//!
//! 发布器写到总线、下游订阅方解析的 JSON 契约：
//! `{id, created_at, aggregate_id, aggregate_type, payload, metadata}`。
//! `payload` 以标准 base64 字符串编码；投递为至少一次，下游按 `id` 去重。
//!
use super::OutboxMessage;
use crate::error::DomainResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub aggregate_id: i64,
    pub aggregate_type: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub metadata: String,
}

impl OutboxEvent {
    pub fn to_bytes(&self) -> DomainResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(bytes: &[u8]) -> DomainResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<&OutboxMessage> for OutboxEvent {
    fn from(message: &OutboxMessage) -> Self {
        Self {
            id: message.id(),
            created_at: message.created_at(),
            aggregate_id: message.aggregate_id(),
            aggregate_type: message.aggregate_type().to_string(),
            payload: message.payload().to_vec(),
            metadata: message.metadata().to_string(),
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
