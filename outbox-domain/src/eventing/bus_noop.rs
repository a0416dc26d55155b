use crate::error::DomainResult as Result;
use crate::eventing::{EventBus, EventHandler};
use async_trait::async_trait;
use std::sync::Arc;

/// 空实现：发布总是成功并直接丢弃，订阅不会收到任何事件
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, _topic: &str, _event: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _topic: &str, _handler: Arc<dyn EventHandler>) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
