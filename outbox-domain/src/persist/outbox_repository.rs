//! Outbox 仓储协议
//!
//! 所有读写都在显式的事务句柄 `Tx` 上进行：
//! - 入队与生产方自身的状态变更共用同一个 `Tx`，一起提交或一起回滚；
//! - 发布器在一个 `Tx` 内完成“加锁拉取 → 发布 → 回写状态”，提交时一并释放行锁。
//!
use crate::{error::DomainResult as Result, message::OutboxMessage};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// 事务句柄；未提交即被丢弃时等同于回滚
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    async fn rollback(&self, tx: Self::Tx) -> Result<()>;

    /// 插入一条消息；数据库错误原样向上传递
    async fn create(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> Result<()>;

    /// 拉取至多 `limit` 条 `pending` 消息并逐行加锁。
    ///
    /// 已被其他事务锁定的行直接跳过（skip-locked），不等待；
    /// 多个发布器实例因此拿到互不重叠的批次。
    async fn get_unprocessed_messages(
        &self,
        tx: &mut Self::Tx,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>>;

    /// 批量标记为 `processed` 并写入 `processed_at`
    async fn save_processed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()>;

    /// 逐行保存 `retry_count`、`last_error` 与可能的 `failed` 状态
    async fn save_failed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()>;
}

#[async_trait]
impl<T> OutboxRepository for Arc<T>
where
    T: OutboxRepository + ?Sized,
{
    type Tx = T::Tx;

    async fn begin(&self) -> Result<Self::Tx> {
        (**self).begin().await
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        (**self).commit(tx).await
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        (**self).rollback(tx).await
    }

    async fn create(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> Result<()> {
        (**self).create(tx, message).await
    }

    async fn get_unprocessed_messages(
        &self,
        tx: &mut Self::Tx,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>> {
        (**self).get_unprocessed_messages(tx, limit).await
    }

    async fn save_processed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()> {
        (**self).save_processed_messages(tx, messages).await
    }

    async fn save_failed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()> {
        (**self).save_failed_messages(tx, messages).await
    }
}
