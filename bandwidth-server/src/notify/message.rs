use crate::queue::{AlertJob, DROP_JOB};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DROP_TITLE: &str = "Bandwidth Drop Detected";

/// 通道无关的通知内容
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

/// 随通知附带的结构化数据（推送时交给前端）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub threshold: f64,
    pub consecutive_drops: usize,
    pub current_speed: f64,
}

impl NotificationMessage {
    /// 掉速告警
    pub fn drop_alert(job: &AlertJob) -> Self {
        let event = &job.event;
        let body = format!(
            "Your internet speed on {} has been below {} Mbps for {} consecutive samples \
             (current speed {:.2} Mbps) at {}",
            job.target,
            event.threshold,
            event.consecutive_drops,
            event.current_speed,
            event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        );

        Self {
            title: DROP_TITLE.to_string(),
            body,
            data: NotificationData {
                kind: DROP_JOB.to_string(),
                target: job.target.clone(),
                timestamp: event.timestamp,
                threshold: event.threshold,
                consecutive_drops: event.consecutive_drops,
                current_speed: event.current_speed,
            },
        }
    }
}
