//! 事务性 Outbox 领域层（outbox-domain）
//!
//! 以“本地写入 + 异步投递”的方式把业务事务产生的领域事件可靠地送达外部消息总线，
//! 无需数据库与总线参与同一个分布式事务：
//! - 投递意图模型与入队校验（`message`）
//! - 显式事务上的 Outbox 仓储协议及内存/Postgres 实现（`persist`）
//! - 事件总线协议、内置后端与定时发布器（`eventing`）
//! - 显式注入的指标出口（`metrics`）
//!
//! 投递语义为至少一次：发布成功但提交失败时，同一事件会在下一轮再次发出，
//! 下游需按事件 `id` 去重。重试耗尽的消息进入终态 `failed`，不会自动重放。
//!
//! 典型用法：
//! 1. 生产方开启事务，写自身状态，并在同一事务内写入 `OutboxMessage`；
//! 2. 选择 `EventBus` 后端，构建 `OutboxPublisher` 并 `start`；
//! 3. 下游通过 `EventBus::subscribe` 消费 `OutboxEvent`。
//!
pub mod error;
pub mod eventing;
pub mod message;
pub mod metrics;
pub mod persist;
