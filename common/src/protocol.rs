use crate::error::{MonitorError, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 采样上报载荷
///
/// `{ download, upload, timestamp }`，时间戳为 ISO-8601 / RFC 3339 字符串。
/// 字段缺失或类型不对都按无效采样处理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplePayload {
    pub download: Option<f64>,
    pub upload: Option<f64>,
    pub timestamp: Option<String>,
}

impl SamplePayload {
    /// 从原始 JSON 文本解析并校验采样
    pub fn parse(text: &str) -> Result<Sample> {
        let payload: SamplePayload = serde_json::from_str(text)
            .map_err(|e| MonitorError::InvalidSample(format!("malformed payload: {}", e)))?;
        payload.into_sample()
    }

    pub fn into_sample(self) -> Result<Sample> {
        let download = self
            .download
            .ok_or_else(|| MonitorError::InvalidSample("missing download".to_string()))?;
        let upload = self
            .upload
            .ok_or_else(|| MonitorError::InvalidSample("missing upload".to_string()))?;
        let raw_timestamp = self
            .timestamp
            .ok_or_else(|| MonitorError::InvalidSample("missing timestamp".to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
            .map_err(|e| {
                MonitorError::InvalidSample(format!("invalid timestamp {:?}: {}", raw_timestamp, e))
            })?
            .with_timezone(&Utc);

        Sample::new(timestamp, download, upload)
    }
}

/// 设置面板
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// 掉速阈值（Mbps）
    pub drop_threshold: f64,
    /// 检测窗口（秒）
    pub drop_detection_window: u64,
    /// 连续低速采样数阈值
    pub drop_duration_threshold: usize,
    /// 告警提前量（分钟），仅保存与展示
    pub alert_advance_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            drop_threshold: 10.0,
            drop_detection_window: 10,
            drop_duration_threshold: 2,
            alert_advance_minutes: 5,
        }
    }
}

/// 设置部分更新
///
/// 数值先以 f64 接收，再统一校验为正数，计数/时长字段还要求是整数。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub drop_threshold: Option<f64>,
    pub drop_detection_window: Option<f64>,
    pub drop_duration_threshold: Option<f64>,
    pub alert_advance_minutes: Option<f64>,
}

impl SettingsUpdate {
    /// 校验全部字段后整体应用，任何字段无效则不做任何修改
    pub fn apply_to(&self, current: &Settings) -> Result<Settings> {
        let mut next = *current;
        if let Some(value) = self.drop_threshold {
            next.drop_threshold = positive("dropThreshold", value)?;
        }
        if let Some(value) = self.drop_detection_window {
            next.drop_detection_window = positive_integer("dropDetectionWindow", value)?;
        }
        if let Some(value) = self.drop_duration_threshold {
            next.drop_duration_threshold =
                positive_integer("dropDurationThreshold", value)? as usize;
        }
        if let Some(value) = self.alert_advance_minutes {
            next.alert_advance_minutes = positive_integer("alertAdvanceMinutes", value)?;
        }
        Ok(next)
    }

    pub fn is_empty(&self) -> bool {
        self.drop_threshold.is_none()
            && self.drop_detection_window.is_none()
            && self.drop_duration_threshold.is_none()
            && self.alert_advance_minutes.is_none()
    }
}

fn positive(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(MonitorError::InvalidConfig(format!(
            "{} must be a positive number, got {}",
            field, value
        )))
    }
}

fn positive_integer(field: &str, value: f64) -> Result<u64> {
    let value = positive(field, value)?;
    if value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(MonitorError::InvalidConfig(format!(
            "{} must be a whole number, got {}",
            field, value
        )));
    }
    Ok(value as u64)
}
