//! 事件处理器（EventHandler）
//!
//! 订阅方对某个 topic 上原始事件字节的消费逻辑。
//! 返回 `Ok` 即确认（ack），返回错误即拒绝（nack），是否重投由总线实现决定。
//!
use async_trait::async_trait;

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于日志与审计）
    fn handler_name(&self) -> &str;
    /// 处理事件
    async fn handle(&self, event: &[u8]) -> anyhow::Result<()>;
}
