//! 事务性 Outbox 应用层（outbox-application）
//!
//! - `OutboxService`：生产方在自身事务内登记投递意图；
//! - `AuditHistorySubscriber`：按事件 `id` 幂等落库的下游订阅者；
//! - `OutboxConfig`：从环境变量加载发布器与总线配置。
//!
pub mod config;
pub mod error;
pub mod service;
pub mod subscriber;

pub use config::{BusBackend, OutboxConfig};
pub use error::{AppError, AppResult};
pub use service::OutboxService;
pub use subscriber::{AuditHistorySubscriber, EventLogEntry, EventLogRepository, InMemoryEventLog};
