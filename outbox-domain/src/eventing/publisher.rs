//! Outbox 发布器（OutboxPublisher）
//!
//! 定时驱动的长驻任务，每轮在同一个事务内完成：
//! - 以 skip-locked 方式拉取至多 `batch_size` 条 `pending` 消息；
//! - 逐条组装线上事件并串行发布到总线；
//! - 成功的批量标记 `processed`，失败的累加 `retry_count`，达到上限进入 `failed`；
//! - 提交事务，状态写入与行锁释放同时生效。
//!
//! 拉取或回写失败时整轮回滚，已发出的事件不会撤回，下游需按事件 `id` 幂等。
//! 定时器错过的 tick 直接跳过，不排队；取消只在两轮之间检查。
//!
use crate::error::{DomainError, DomainResult};
use crate::eventing::EventBus;
use crate::message::{MessageStatus, OutboxEvent, OutboxMessage};
use crate::metrics::{
    APPLICATION_ERRORS, MetricsSink, NoopMetrics, OUTBOX_PUBLISHER_ERROR, OUTBOX_WORKER_FAILED,
    OUTBOX_WORKER_PROCESSED,
};
use crate::persist::OutboxRepository;
use bon::Builder;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "outbox-publisher";

fn default_metrics() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

#[derive(Builder)]
pub struct OutboxPublisher<R> {
    repository: R,
    event_bus: Arc<dyn EventBus>,
    #[builder(default = default_metrics())]
    metrics: Arc<dyn MetricsSink>,
    #[builder(default)]
    config: PublisherConfig,
}

/// 单轮执行结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// 本轮拉取并锁定的行数
    pub fetched: usize,
    /// 发布成功并标记为 `processed` 的行数
    pub processed: usize,
    /// 发布失败但仍保持 `pending` 的行数
    pub retried: usize,
    /// 本轮进入终态 `failed` 的行数
    pub failed: usize,
}

impl<R> OutboxPublisher<R>
where
    R: OutboxRepository,
{
    /// 启动发布循环，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> PublisherHandle
    where
        R: 'static,
        R::Tx: 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(Self::run(self, token.clone()));
        PublisherHandle {
            token,
            tasks: vec![task],
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            component = COMPONENT,
            interval = ?period,
            batch_size = self.config.batch_size,
            "outbox publisher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!(component = COMPONENT, "outbox publisher stopped");
    }

    async fn tick(&self) {
        match self.run_once().await {
            Ok(report) if report.fetched > 0 => debug!(
                component = COMPONENT,
                fetched = report.fetched,
                processed = report.processed,
                retried = report.retried,
                failed = report.failed,
                "outbox publisher iteration finished"
            ),
            Ok(_) => {}
            Err(err) => {
                error!(component = COMPONENT, error = %err, "outbox publisher iteration aborted");
                self.metrics
                    .incr_counter(APPLICATION_ERRORS, &[("type", OUTBOX_PUBLISHER_ERROR)]);
            }
        }
    }

    /// 执行一轮：拉取、发布、回写并提交。出错时回滚整轮的状态变更。
    pub async fn run_once(&self) -> DomainResult<RunReport> {
        let mut tx = self.repository.begin().await?;

        match self.process_batch(&mut tx).await {
            Ok(report) => {
                self.repository.commit(tx).await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = self.repository.rollback(tx).await {
                    warn!(
                        component = COMPONENT,
                        error = %rollback_err,
                        "rollback after aborted iteration failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn process_batch(&self, tx: &mut R::Tx) -> DomainResult<RunReport> {
        debug!(component = COMPONENT, "running outbox publisher job");

        let messages = self
            .repository
            .get_unprocessed_messages(tx, self.config.batch_size)
            .await?;

        let mut report = RunReport {
            fetched: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return Ok(report);
        }

        let mut processed: Vec<OutboxMessage> = Vec::new();
        let mut attempted: Vec<OutboxMessage> = Vec::new();

        for mut message in messages {
            let event = OutboxEvent::from(&message).to_bytes()?;

            match self.publish(message.topic(), &event).await {
                Ok(()) => {
                    debug!(
                        component = COMPONENT,
                        id = %message.id(),
                        topic = message.topic(),
                        "published outbox message"
                    );
                    self.metrics.incr_counter(OUTBOX_WORKER_PROCESSED, &[]);
                    processed.push(message);
                }
                Err(err) => {
                    let status = message.record_failure(err.to_string())?;
                    warn!(
                        component = COMPONENT,
                        id = %message.id(),
                        topic = message.topic(),
                        retry_count = message.retry_count(),
                        max_retries = message.max_retries(),
                        error = %err,
                        "failed to publish outbox message"
                    );
                    self.metrics
                        .incr_counter(APPLICATION_ERRORS, &[("type", OUTBOX_PUBLISHER_ERROR)]);
                    self.metrics.incr_counter(OUTBOX_WORKER_FAILED, &[]);

                    if status == MessageStatus::Failed {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                    attempted.push(message);
                }
            }
        }

        report.processed = processed.len();

        if !processed.is_empty() {
            self.repository
                .save_processed_messages(tx, &processed)
                .await?;
        }
        if !attempted.is_empty() {
            self.repository
                .save_failed_messages(tx, &attempted)
                .await?;
        }

        Ok(report)
    }

    async fn publish(&self, topic: &str, event: &[u8]) -> DomainResult<()> {
        let Some(limit) = self.config.publish_timeout else {
            return self.event_bus.publish(topic, event).await;
        };
        match time::timeout(limit, self.event_bus.publish(topic, event)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::event_bus(format!(
                "publish timed out after {limit:?}"
            ))),
        }
    }
}

/// 发布器配置
#[derive(Clone, Copy, Debug)]
pub struct PublisherConfig {
    /// 轮询间隔，同时也是失败重试的隐式退避
    pub interval: Duration,
    /// 单轮最多拉取的行数
    pub batch_size: usize,
    /// 单次发布调用的超时，`None` 表示不限制
    pub publish_timeout: Option<Duration>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 1000,
            publish_timeout: None,
        }
    }
}

/// 发布器运行句柄：用于优雅关闭与等待任务结束
pub struct PublisherHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PublisherHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
