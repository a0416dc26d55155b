//! 内存版事件总线（InMemoryEventBus）
//!
//! 按 topic 扇出的进程内总线，满足 `EventBus` 协议：
//! - `publish`：把事件投入该 topic 所有订阅者的队列，不等待处理；
//! - `subscribe`：为每个订阅者启动一个后台任务，串行调用处理器；
//! - 持久模式下保留历史事件，后加入的订阅者会先收到此前发布的全部事件；
//! - 处理器返回错误（nack）时立即重投，超过 `max_redeliveries` 后丢弃并记录日志。
//!
//! 典型用途：测试环境、示例与本地开发。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::eventing::{EventBus, EventHandler};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

type Payload = Arc<[u8]>;

/// 内存总线配置
#[derive(Clone, Copy, Debug)]
pub struct InMemoryBusConfig {
    /// 是否保留历史事件并回放给后加入的订阅者
    pub persistent: bool,
    /// 单个事件被 nack 后的最大重投次数
    pub max_redeliveries: usize,
}

impl Default for InMemoryBusConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            max_redeliveries: 3,
        }
    }
}

#[derive(Default)]
struct Topic {
    history: Vec<Payload>,
    subscribers: Vec<mpsc::UnboundedSender<Payload>>,
}

pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, Topic>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    token: CancellationToken,
    config: InMemoryBusConfig,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(InMemoryBusConfig::default())
    }
}

impl InMemoryEventBus {
    pub fn new(config: InMemoryBusConfig) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            token: CancellationToken::new(),
            config,
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(DomainError::event_bus("in-memory bus is shut down"));
        }
        Ok(())
    }

    async fn deliver_loop(
        topic: String,
        receiver: mpsc::UnboundedReceiver<Payload>,
        handler: Arc<dyn EventHandler>,
        token: CancellationToken,
        max_redeliveries: usize,
    ) {
        let mut stream = UnboundedReceiverStream::new(receiver);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = stream.next() => match next {
                    Some(event) => {
                        Self::deliver(&topic, handler.as_ref(), &event, max_redeliveries).await
                    }
                    None => break,
                },
            }
        }
    }

    async fn deliver(
        topic: &str,
        handler: &dyn EventHandler,
        event: &[u8],
        max_redeliveries: usize,
    ) {
        for attempt in 0..=max_redeliveries {
            match handler.handle(event).await {
                Ok(()) => return,
                Err(err) => warn!(
                    component = "inmemory-bus",
                    topic,
                    handler = handler.handler_name(),
                    attempt,
                    error = %err,
                    "handler rejected event"
                ),
            }
        }
        error!(
            component = "inmemory-bus",
            topic,
            handler = handler.handler_name(),
            "dropping event after exhausting redeliveries"
        );
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, event: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let event: Payload = Arc::from(event);

        let mut topics = self.topics();
        let entry = topics.entry(topic.to_string()).or_default();
        if self.config.persistent {
            entry.history.push(event.clone());
        }
        // 已退出的订阅者顺带清理
        entry
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut topics = self.topics();
            let entry = topics.entry(topic.to_string()).or_default();
            for past in &entry.history {
                let _ = sender.send(past.clone());
            }
            entry.subscribers.push(sender);
        }

        let task = tokio::spawn(Self::deliver_loop(
            topic.to_string(),
            receiver,
            handler,
            self.token.clone(),
            self.config.max_redeliveries,
        ));
        self.tasks.lock().await.push(task);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.token.cancel();
        for topic in self.topics().values_mut() {
            topic.subscribers.clear();
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}
