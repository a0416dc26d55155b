//! 审计历史订阅者
//!
//! 解析总线上的 `OutboxEvent` 并写入事件日志。投递为至少一次，
//! 同一事件可能多次到达，日志按事件 `id` 去重。
//!
use crate::error::AppResult;
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use outbox_domain::error::DomainResult;
use outbox_domain::eventing::{EventBus, EventHandler};
use outbox_domain::message::OutboxEvent;
use outbox_domain::metrics::{APPLICATION_ERRORS, MetricsSink, NoopMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub const AUDIT_SUBSCRIBER_PROCESSED: &str = "application_audit_subscriber_processed";
pub const AUDIT_SUBSCRIBER_ERROR: &str = "audit_subscriber_error";

const COMPONENT: &str = "audit-history-subscriber";

/// 一条已落库的事件记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub aggregate_id: i64,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: String,
}

impl From<OutboxEvent> for EventLogEntry {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            occurred_at: event.created_at,
            aggregate_id: event.aggregate_id,
            event_type: event.aggregate_type,
            data: event.payload,
            metadata: event.metadata,
        }
    }
}

#[async_trait]
pub trait EventLogRepository: Send + Sync {
    /// 保存记录；同 `id` 已存在时不覆盖并返回 `false`
    async fn save(&self, entry: EventLogEntry) -> AppResult<bool>;
}

#[async_trait]
impl<T> EventLogRepository for Arc<T>
where
    T: EventLogRepository + ?Sized,
{
    async fn save(&self, entry: EventLogEntry) -> AppResult<bool> {
        (**self).save(entry).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    entries: DashMap<Uuid, EventLogEntry>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<EventLogEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 全部记录，按发生时间排序
    pub fn entries(&self) -> Vec<EventLogEntry> {
        let mut all: Vec<EventLogEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| (e.occurred_at, e.id));
        all
    }
}

#[async_trait]
impl EventLogRepository for InMemoryEventLog {
    async fn save(&self, entry: EventLogEntry) -> AppResult<bool> {
        match self.entries.entry(entry.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }
}

fn default_metrics() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

#[derive(Builder)]
pub struct AuditHistorySubscriber<L> {
    log: L,
    #[builder(default = default_metrics())]
    metrics: Arc<dyn MetricsSink>,
}

impl<L> AuditHistorySubscriber<L>
where
    L: EventLogRepository + 'static,
{
    /// 在 `bus` 上订阅 `topic`
    pub async fn subscribe(self: Arc<Self>, bus: &dyn EventBus, topic: &str) -> DomainResult<()> {
        bus.subscribe(topic, self).await
    }

    fn record_error(&self) {
        self.metrics
            .incr_counter(APPLICATION_ERRORS, &[("type", AUDIT_SUBSCRIBER_ERROR)]);
    }
}

#[async_trait]
impl<L> EventHandler for AuditHistorySubscriber<L>
where
    L: EventLogRepository + 'static,
{
    fn handler_name(&self) -> &str {
        COMPONENT
    }

    async fn handle(&self, event: &[u8]) -> anyhow::Result<()> {
        let event = match OutboxEvent::from_slice(event) {
            Ok(event) => event,
            Err(err) => {
                error!(component = COMPONENT, error = %err, "failed to decode event");
                self.record_error();
                return Err(anyhow::anyhow!("failed to decode event: {err}"));
            }
        };

        let id = event.id;
        match self.log.save(EventLogEntry::from(event)).await {
            Ok(true) => {
                debug!(component = COMPONENT, %id, "event recorded");
                self.metrics.incr_counter(AUDIT_SUBSCRIBER_PROCESSED, &[]);
                Ok(())
            }
            Ok(false) => {
                debug!(component = COMPONENT, %id, "duplicate event ignored");
                Ok(())
            }
            Err(err) => {
                error!(component = COMPONENT, %id, error = %err, "failed to save event log");
                self.record_error();
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_domain::metrics::InMemoryMetrics;

    fn event(id: Uuid) -> Vec<u8> {
        OutboxEvent {
            id,
            created_at: Utc::now(),
            aggregate_id: 42,
            aggregate_type: "fruit".into(),
            payload: br#"{"name":"pear"}"#.to_vec(),
            metadata: "updated".into(),
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn records_event_once_per_id() {
        let log = Arc::new(InMemoryEventLog::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let subscriber = AuditHistorySubscriber::builder()
            .log(log.clone())
            .metrics(metrics.clone())
            .build();

        let id = Uuid::new_v4();
        subscriber.handle(&event(id)).await.unwrap();
        subscriber.handle(&event(id)).await.unwrap();

        assert_eq!(log.len(), 1);
        let entry = log.get(id).unwrap();
        assert_eq!(entry.aggregate_id, 42);
        assert_eq!(entry.event_type, "fruit");
        assert_eq!(entry.data, br#"{"name":"pear"}"#);
        assert_eq!(entry.metadata, "updated");
        assert_eq!(metrics.counter(AUDIT_SUBSCRIBER_PROCESSED, &[]), 1);
    }

    #[tokio::test]
    async fn malformed_event_is_nacked() {
        let log = Arc::new(InMemoryEventLog::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let subscriber = AuditHistorySubscriber::builder()
            .log(log.clone())
            .metrics(metrics.clone())
            .build();

        assert!(subscriber.handle(b"not json").await.is_err());
        assert!(log.is_empty());
        assert_eq!(
            metrics.counter(APPLICATION_ERRORS, &[("type", AUDIT_SUBSCRIBER_ERROR)]),
            1
        );
    }
}
