//! PostgreSQL Outbox 仓储（PgOutboxRepository）
//!
//! 基于 sqlx 的 `transactional_outbox` 实现：
//! - 拉取使用 `FOR UPDATE SKIP LOCKED`，并发实例拿到互不重叠的批次；
//! - 状态回写均带 `status = 'pending'` 条件，终态行不会被改写；
//! - 迁移脚本随 crate 内嵌，可由 `migrate` 执行。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::message::{MessageStatus, OutboxMessage};
use crate::persist::OutboxRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, Transaction};
use uuid::Uuid;

/// 建表与索引脚本
pub const MIGRATION: &str = include_str!("../../migrations/0001_create_transactional_outbox.sql");

const INSERT_MESSAGE: &str = r#"
    INSERT INTO transactional_outbox (
        id, aggregate_id, aggregate_type, topic, payload, created_at,
        processed_at, status, retry_count, max_retries, last_error, metadata
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

const SELECT_PENDING_FOR_UPDATE: &str = r#"
    SELECT id, aggregate_id, aggregate_type, topic, payload, created_at,
           processed_at, status, retry_count, max_retries, last_error, metadata
    FROM transactional_outbox
    WHERE status = 'pending'
    ORDER BY created_at ASC
    LIMIT $1
    FOR UPDATE SKIP LOCKED
"#;

const MARK_PROCESSED: &str = r#"
    UPDATE transactional_outbox
    SET status = 'processed', processed_at = NOW()
    WHERE id = ANY($1) AND status = 'pending'
"#;

const SAVE_ATTEMPT: &str = r#"
    UPDATE transactional_outbox
    SET retry_count = $2, last_error = $3, status = $4
    WHERE id = $1 AND status = 'pending'
"#;

#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    aggregate_id: i64,
    aggregate_type: String,
    topic: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    status: String,
    retry_count: i32,
    max_retries: i32,
    last_error: String,
    metadata: String,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = DomainError;

    fn try_from(row: OutboxRow) -> Result<Self> {
        let status: MessageStatus = row.status.parse()?;
        Ok(OutboxMessage::builder()
            .id(row.id)
            .aggregate_id(row.aggregate_id)
            .aggregate_type(row.aggregate_type)
            .topic(row.topic)
            .payload(row.payload)
            .created_at(row.created_at)
            .maybe_processed_at(row.processed_at)
            .status(status)
            .retry_count(row.retry_count)
            .max_retries(row.max_retries)
            .last_error(row.last_error)
            .metadata(row.metadata)
            .build())
    }
}

#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行内嵌迁移（幂等）
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        tx.rollback().await?;
        Ok(())
    }

    async fn create(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> Result<()> {
        sqlx::query(INSERT_MESSAGE)
            .bind(message.id())
            .bind(message.aggregate_id())
            .bind(message.aggregate_type())
            .bind(message.topic())
            .bind(message.payload())
            .bind(message.created_at())
            .bind(message.processed_at())
            .bind(message.status().as_str())
            .bind(message.retry_count())
            .bind(message.max_retries())
            .bind(message.last_error())
            .bind(message.metadata())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn get_unprocessed_messages(
        &self,
        tx: &mut Self::Tx,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<OutboxRow> = sqlx::query_as::<_, OutboxRow>(SELECT_PENDING_FOR_UPDATE)
            .bind(limit)
            .fetch_all(&mut **tx)
            .await?;

        rows.into_iter().map(OutboxMessage::try_from).collect()
    }

    async fn save_processed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = messages.iter().map(OutboxMessage::id).collect();
        sqlx::query(MARK_PROCESSED)
            .bind(ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn save_failed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()> {
        // 每行的结果可能不同（仍待重试或已终态），逐行保存
        for message in messages {
            sqlx::query(SAVE_ATTEMPT)
                .bind(message.id())
                .bind(message.retry_count())
                .bind(message.last_error())
                .bind(message.status().as_str())
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}
