//! Outbox 入队服务
//!
//! 生产方在自身业务事务中调用 `new_outbox_message`，投递意图与业务状态
//! 一起提交或一起回滚。服务本身从不直接发布到总线。
//!
use outbox_domain::error::DomainResult;
use outbox_domain::message::{DEFAULT_MAX_RETRIES, NewMessage, OutboxMessage};
use outbox_domain::persist::OutboxRepository;
use tracing::debug;
use uuid::Uuid;

pub struct OutboxService<R> {
    repository: R,
    max_retries: i32,
}

impl<R> OutboxService<R>
where
    R: OutboxRepository,
{
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// 在调用方事务 `tx` 内登记一条待投递消息，返回其 `id`。
    ///
    /// 校验失败时立即返回，不写入任何行。
    pub async fn new_outbox_message(
        &self,
        tx: &mut R::Tx,
        topic: &str,
        message: NewMessage,
    ) -> DomainResult<Uuid> {
        message.validate()?;

        let msg = OutboxMessage::pending(topic, message, self.max_retries);
        self.repository.create(tx, &msg).await?;

        debug!(
            id = %msg.id(),
            topic,
            aggregate_type = msg.aggregate_type(),
            aggregate_id = msg.aggregate_id(),
            "outbox message enqueued"
        );
        Ok(msg.id())
    }
}
