//! 事件子系统（eventing）
//!
//! 提供事件发布/订阅与 Outbox 投递的基础抽象与运行时：
//! - `EventBus`：统一发布/订阅接口，后端可替换；
//! - `EventHandler`：订阅方对原始事件的处理逻辑（ack/nack）；
//! - `InMemoryEventBus` / `NoopEventBus`：内置后端；
//! - `OutboxPublisher`：定时从 Outbox 拉取待投递消息、发布并回写状态。
//!
pub mod bus;
pub mod bus_inmemory;
pub mod bus_noop;
pub mod handler;
pub mod publisher;

pub use bus::EventBus;
pub use bus_inmemory::{InMemoryBusConfig, InMemoryEventBus};
pub use bus_noop::NoopEventBus;
pub use handler::EventHandler;
pub use publisher::{OutboxPublisher, PublisherConfig, PublisherHandle, RunReport};
