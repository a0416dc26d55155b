//! 持久化（persist）
//!
//! 定义 Outbox 仓储协议及其实现：
//! - `OutboxRepository`：插入、加锁批量拉取、批量回写状态，全部绑定显式事务；
//! - `InMemoryOutboxRepository`：进程内实现，模拟 skip-locked 行锁；
//! - `PgOutboxRepository`：PostgreSQL 实现（`infra-sqlx` 特性）。
//!
mod inmemory;
mod outbox_repository;
#[cfg(feature = "infra-sqlx")]
mod postgres;

pub use inmemory::{InMemoryOutboxRepository, InMemoryTx};
pub use outbox_repository::OutboxRepository;
#[cfg(feature = "infra-sqlx")]
pub use postgres::{MIGRATION, PgOutboxRepository};
