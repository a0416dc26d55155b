//! 指标出口（MetricsSink）
//!
//! 计数器通过显式注入的 `MetricsSink` 上报，不依赖全局注册表：
//! - `PrometheusMetrics`：基于 `prometheus::Registry` 的计数器，可导出文本格式；
//! - `InMemoryMetrics`：以 `name{k=v,...}` 为键累计计数，供测试断言；
//! - `NoopMetrics`：默认实现，丢弃全部计数。
//!
use dashmap::DashMap;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// 每次成功发布 +1
pub const OUTBOX_WORKER_PROCESSED: &str = "application_outbox_worker_processed";
/// 每次发布失败 +1（无论是否进入终态）
pub const OUTBOX_WORKER_FAILED: &str = "application_outbox_worker_failed";
/// 通用错误计数，以 `type` 标签区分来源
pub const APPLICATION_ERRORS: &str = "application_errors";
pub const OUTBOX_PUBLISHER_ERROR: &str = "outbox_publisher_error";

pub type Labels<'a> = &'a [(&'static str, &'static str)];

pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &'static str, _labels: Labels<'_>) {}
}

/// 已注册计数器及其标签名（按注册顺序）
struct RegisteredCounter {
    counter: IntCounterVec,
    label_names: Vec<&'static str>,
}

/// Prometheus 计数器出口
///
/// 构建时注册发布器使用的计数器；其他组件的计数器需先 `register_counter`，
/// 未注册的名称只记录告警，不会创建新指标。
pub struct PrometheusMetrics {
    registry: Registry,
    counters: DashMap<&'static str, RegisteredCounter>,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let metrics = Self {
            registry: Registry::new(),
            counters: DashMap::new(),
        };
        metrics.register_counter(
            OUTBOX_WORKER_PROCESSED,
            "Outbox messages published successfully",
            &[],
        )?;
        metrics.register_counter(
            OUTBOX_WORKER_FAILED,
            "Outbox publish attempts that failed",
            &[],
        )?;
        metrics.register_counter(APPLICATION_ERRORS, "Application errors by type", &["type"])?;
        Ok(metrics)
    }

    pub fn register_counter(
        &self,
        name: &'static str,
        help: &str,
        label_names: &[&'static str],
    ) -> Result<(), prometheus::Error> {
        let counter = IntCounterVec::new(Opts::new(name, help), label_names)?;
        self.registry.register(Box::new(counter.clone()))?;
        self.counters.insert(
            name,
            RegisteredCounter {
                counter,
                label_names: label_names.to_vec(),
            },
        );
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 以 Prometheus 文本格式导出全部指标
    pub fn gather(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>) {
        let Some(registered) = self.counters.get(name) else {
            warn!(metric = name, "counter is not registered");
            return;
        };
        let values: Vec<&str> = registered
            .label_names
            .iter()
            .map(|label| {
                labels
                    .iter()
                    .find(|(k, _)| k == label)
                    .map(|(_, v)| *v)
                    .unwrap_or("")
            })
            .collect();
        match registered.counter.get_metric_with_label_values(&values) {
            Ok(counter) => counter.inc(),
            Err(err) => warn!(metric = name, error = %err, "failed to increment counter"),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        self.counters
            .get(&Self::key(name, labels))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// 当前全部计数的快照，按键排序
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut all: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        all.sort();
        all
    }

    fn key(name: &str, labels: Labels<'_>) -> String {
        if labels.is_empty() {
            return name.to_string();
        }
        let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        format!("{name}{{{}}}", pairs.join(","))
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, name: &'static str, labels: Labels<'_>) {
        *self.counters.entry(Self::key(name, labels)).or_insert(0) += 1;
    }
}
