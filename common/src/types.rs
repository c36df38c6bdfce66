use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// 吞吐量采样
///
/// 由外部采样源产生，检测器与广播器各消费一次，之后不再修改。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// 下行速率（Mbps）
    pub download: f64,
    /// 上行速率（Mbps）
    pub upload: f64,
}

impl Sample {
    /// 创建并校验采样
    pub fn new(timestamp: DateTime<Utc>, download: f64, upload: f64) -> Result<Self> {
        let sample = Self {
            timestamp,
            download,
            upload,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// 速率必须为有限非负数
    pub fn validate(&self) -> Result<()> {
        check_speed("download", self.download)?;
        check_speed("upload", self.upload)?;
        Ok(())
    }
}

fn check_speed(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(MonitorError::InvalidSample(format!(
            "{} must be a finite number",
            field
        )));
    }
    if value < 0.0 {
        return Err(MonitorError::InvalidSample(format!(
            "{} must not be negative, got {}",
            field, value
        )));
    }
    Ok(())
}

/// 掉速告警事件
///
/// 检测器在确认一次持续掉速后产生，入队后所有权转移给告警队列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub detected: bool,
    /// 触发告警的连续低速采样数
    pub consecutive_drops: usize,
    /// 触发时的阈值（Mbps）
    pub threshold: f64,
    /// 窗口内最新采样的下行速率
    pub current_speed: f64,
    /// 检测时刻
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(
        consecutive_drops: usize,
        threshold: f64,
        current_speed: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            detected: true,
            consecutive_drops,
            threshold,
            current_speed,
            timestamp,
        }
    }
}
