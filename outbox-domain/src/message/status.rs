use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// 投递意图的状态：`pending` 起始，只能单向流转到 `processed` 或 `failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Processed,
    Failed,
}

impl MessageStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processed => "processed",
            MessageStatus::Failed => "failed",
        }
    }

    /// 终态不再被任何自动流程选中
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processed" => Ok(MessageStatus::Processed),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(DomainError::Parse {
                reason: format!("unknown outbox status: {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_stored_value() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Processed,
            MessageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(MessageStatus::Processed.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
    }
}
