//! 持久化的投递意图（OutboxMessage）
//!
//! 对应 `transactional_outbox` 表中的一行。状态只能由 `pending`
//! 单向流转到 `processed`（成功）或 `failed`（重试耗尽），
//! 流转规则集中在本类型的方法里，仓储与发布器都不直接改字段。
//!
use super::{MessageStatus, NewMessage};
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 入队时固定写入的最大发布尝试次数
pub const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct OutboxMessage {
    id: Uuid,
    aggregate_id: i64,
    #[builder(into)]
    aggregate_type: String,
    #[builder(into)]
    topic: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    #[builder(default)]
    status: MessageStatus,
    #[builder(default)]
    retry_count: i32,
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: i32,
    #[builder(into, default)]
    last_error: String,
    #[builder(into, default)]
    metadata: String,
}

impl OutboxMessage {
    /// 基于已校验的入队请求构造一条新的 `pending` 消息
    pub fn pending(topic: impl Into<String>, message: NewMessage, max_retries: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: message.aggregate_id,
            aggregate_type: message.aggregate_type,
            topic: topic.into(),
            payload: message.payload,
            created_at: Utc::now(),
            processed_at: None,
            status: MessageStatus::Pending,
            retry_count: 0,
            max_retries,
            last_error: String::new(),
            metadata: message.metadata,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn aggregate_id(&self) -> i64 {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }

    /// 发布成功：`pending -> processed`，同时写入 `processed_at`
    pub fn mark_processed(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("mark processed")?;
        self.status = MessageStatus::Processed;
        self.processed_at = Some(at);
        Ok(())
    }

    /// 记录一次发布失败，返回记录后的状态。
    ///
    /// `retry_count` 恰好加一；达到 `max_retries` 时进入终态 `failed`，
    /// 否则保持 `pending`，等待下一轮轮询重试。
    pub fn record_failure(&mut self, error: impl Into<String>) -> DomainResult<MessageStatus> {
        self.ensure_pending("record failure")?;
        self.retry_count += 1;
        self.last_error = error.into();
        if self.retry_count >= self.max_retries {
            self.status = MessageStatus::Failed;
        }
        Ok(self.status)
    }

    fn ensure_pending(&self, action: &str) -> DomainResult<()> {
        if self.is_pending() {
            return Ok(());
        }
        Err(DomainError::InvalidState {
            reason: format!(
                "cannot {action} for outbox message {} in status {}",
                self.id, self.status
            ),
        })
    }
}
