use chrono::{DateTime, Utc};
use common::AlertEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 掉速告警任务类型
pub const DROP_JOB: &str = "drop";

/// 告警任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertJob {
    pub id: Uuid,
    /// 任务类型，通知分发器据此选择处理方式
    pub kind: String,
    pub target: String,
    pub event: AlertEvent,
    /// 已失败的投递次数
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl AlertJob {
    pub fn drop_alert(target: &str, event: AlertEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: DROP_JOB.to_string(),
            target: target.to_string(),
            event,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// 永久失败的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub job: AlertJob,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// 日志记录
///
/// 队列状态完全由日志重放得到：入队后未确认、未失败的任务在重启后重新投递。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    Enqueued(AlertJob),
    Retried {
        id: Uuid,
        attempts: u32,
        last_error: String,
    },
    Acked {
        id: Uuid,
    },
    Failed(DeadLetter),
}
