//! 事件总线（EventBus）协议
//!
//! 发布/订阅能力的统一抽象。核心代码（入队服务、仓储、发布器）只依赖本协议，
//! 具体后端在进程启动时选定并注入，核心逻辑不感知后端身份。
//!
use super::EventHandler;
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布事件到 `topic`，不等待订阅方处理结果，可能失败
    async fn publish(&self, topic: &str, event: &[u8]) -> Result<()>;

    /// 订阅 `topic`，由后端在后台任务中调用 `handler`
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()>;

    /// 停止全部订阅并等待后台任务退出
    async fn shutdown(&self) -> Result<()>;
}

#[async_trait]
impl<T> EventBus for Arc<T>
where
    T: EventBus + ?Sized,
{
    async fn publish(&self, topic: &str, event: &[u8]) -> Result<()> {
        (**self).publish(topic, event).await
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        (**self).subscribe(topic, handler).await
    }

    async fn shutdown(&self) -> Result<()> {
        (**self).shutdown().await
    }
}
