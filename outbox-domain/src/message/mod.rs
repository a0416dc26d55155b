//! 投递意图模型（message）
//!
//! - `NewMessage`：生产方提交的入队请求与校验规则；
//! - `OutboxMessage`：持久化的投递意图及其状态流转；
//! - `OutboxEvent`：发布到总线的线上事件格式。
//!
mod event;
mod new_message;
mod outbox_message;
mod status;

pub use event::OutboxEvent;
pub use new_message::{
    AGGREGATE_TYPE_MAX_LEN, AGGREGATE_TYPE_MIN_LEN, METADATA_MAX_LEN, NewMessage, PAYLOAD_MIN_LEN,
};
pub use outbox_message::{DEFAULT_MAX_RETRIES, OutboxMessage};
pub use status::MessageStatus;
