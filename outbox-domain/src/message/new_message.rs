//! 入队请求（NewMessage）
//!
//! 生产方提交的投递意图，由 `validate` 在写入前完成全部字段校验；
//! 任一规则不满足时直接返回校验错误，不落任何数据。
//!
use crate::error::{DomainError, DomainResult};
use bon::Builder;

pub const AGGREGATE_TYPE_MIN_LEN: usize = 3;
pub const AGGREGATE_TYPE_MAX_LEN: usize = 100;
pub const PAYLOAD_MIN_LEN: usize = 2;
pub const METADATA_MAX_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct NewMessage {
    /// 产生事件的业务实体 ID（>= 1）
    pub aggregate_id: i64,
    /// 事件来源的逻辑名称
    #[builder(into)]
    pub aggregate_type: String,
    /// 不透明的业务负载
    pub payload: Vec<u8>,
    /// 自由格式的附加信息，可为空
    #[builder(into, default)]
    pub metadata: String,
}

impl NewMessage {
    pub fn validate(&self) -> DomainResult<()> {
        if self.aggregate_id < 1 {
            return Err(DomainError::validation(
                "aggregate_id",
                format!("must be >= 1, got {}", self.aggregate_id),
            ));
        }

        let type_len = self.aggregate_type.chars().count();
        if !(AGGREGATE_TYPE_MIN_LEN..=AGGREGATE_TYPE_MAX_LEN).contains(&type_len) {
            return Err(DomainError::validation(
                "aggregate_type",
                format!(
                    "length must be in [{AGGREGATE_TYPE_MIN_LEN}, {AGGREGATE_TYPE_MAX_LEN}], got {type_len}"
                ),
            ));
        }

        if self.payload.len() < PAYLOAD_MIN_LEN {
            return Err(DomainError::validation(
                "payload",
                format!(
                    "must be at least {PAYLOAD_MIN_LEN} bytes, got {}",
                    self.payload.len()
                ),
            ));
        }

        let metadata_len = self.metadata.chars().count();
        if metadata_len > METADATA_MAX_LEN {
            return Err(DomainError::validation(
                "metadata",
                format!("length must be <= {METADATA_MAX_LEN}, got {metadata_len}"),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NewMessage {
        NewMessage::builder()
            .aggregate_id(1)
            .aggregate_type("fruit")
            .payload(br#"{"name":"apple"}"#.to_vec())
            .build()
    }

    fn rejected_field(msg: NewMessage) -> &'static str {
        match msg.validate() {
            Err(DomainError::Validation { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_minimal_message_with_empty_metadata() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_each_broken_rule() {
        let mut msg = valid();
        msg.aggregate_id = 0;
        assert_eq!(rejected_field(msg), "aggregate_id");

        let mut msg = valid();
        msg.aggregate_type = String::new();
        assert_eq!(rejected_field(msg), "aggregate_type");

        let mut msg = valid();
        msg.aggregate_type = "x".repeat(AGGREGATE_TYPE_MAX_LEN + 1);
        assert_eq!(rejected_field(msg), "aggregate_type");

        let mut msg = valid();
        msg.payload = Vec::new();
        assert_eq!(rejected_field(msg), "payload");

        let mut msg = valid();
        msg.payload = vec![b'{'];
        assert_eq!(rejected_field(msg), "payload");

        let mut msg = valid();
        msg.metadata = "m".repeat(METADATA_MAX_LEN + 1);
        assert_eq!(rejected_field(msg), "metadata");
    }

    #[test]
    fn boundaries_are_inclusive() {
        let mut msg = valid();
        msg.aggregate_type = "abc".into();
        msg.payload = b"{}".to_vec();
        msg.metadata = "m".repeat(METADATA_MAX_LEN);
        assert!(msg.validate().is_ok());

        // 长度按字符而非字节计算
        msg.aggregate_type = "水果类".into();
        assert!(msg.validate().is_ok());
    }
}
