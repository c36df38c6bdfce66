use common::{MonitorError, Result, Settings};
use serde::{Deserialize, Serialize};

/// 窗口长度上限（秒），与设置面板的整数上限一致
pub const MAX_WINDOW_SECONDS: u64 = u32::MAX as u64;
/// 冷却时间上限（毫秒），约 49 天
pub const MAX_COOLDOWN_MS: u64 = u32::MAX as u64;

/// 掉速检测配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    /// 掉速阈值（Mbps），下行低于该值视为一次掉速
    pub threshold: f64,
    /// 滑动窗口长度（秒）
    pub window_seconds: u64,
    /// 触发告警所需的连续掉速采样数
    pub duration_threshold: usize,
    /// 两次告警之间的最小间隔（毫秒），0 表示不抑制
    pub cooldown_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            window_seconds: 10,
            duration_threshold: 2,
            cooldown_ms: 5 * 60 * 1000,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(MonitorError::InvalidConfig(format!(
                "threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        if self.window_seconds == 0 || self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(MonitorError::InvalidConfig(format!(
                "windowSeconds must be between 1 and {}, got {}",
                MAX_WINDOW_SECONDS, self.window_seconds
            )));
        }
        if self.duration_threshold == 0 {
            return Err(MonitorError::InvalidConfig(
                "durationThreshold must be at least 1".to_string(),
            ));
        }
        if self.cooldown_ms > MAX_COOLDOWN_MS {
            return Err(MonitorError::InvalidConfig(format!(
                "cooldownMs must be at most {}, got {}",
                MAX_COOLDOWN_MS, self.cooldown_ms
            )));
        }
        Ok(())
    }

    /// 用设置面板的值覆盖检测参数，冷却时间保持不变
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.threshold = settings.drop_threshold;
        self.window_seconds = settings.drop_detection_window;
        self.duration_threshold = settings.drop_duration_threshold;
        self
    }
}

/// 检测配置的部分更新，未提供的字段保持原值
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfigUpdate {
    pub threshold: Option<f64>,
    pub window_seconds: Option<u64>,
    pub duration_threshold: Option<usize>,
    pub cooldown_ms: Option<u64>,
}

impl DetectorConfigUpdate {
    pub fn merge_into(&self, current: &DetectorConfig) -> DetectorConfig {
        DetectorConfig {
            threshold: self.threshold.unwrap_or(current.threshold),
            window_seconds: self.window_seconds.unwrap_or(current.window_seconds),
            duration_threshold: self.duration_threshold.unwrap_or(current.duration_threshold),
            cooldown_ms: self.cooldown_ms.unwrap_or(current.cooldown_ms),
        }
    }
}

impl From<&Settings> for DetectorConfigUpdate {
    fn from(settings: &Settings) -> Self {
        Self {
            threshold: Some(settings.drop_threshold),
            window_seconds: Some(settings.drop_detection_window),
            duration_threshold: Some(settings.drop_duration_threshold),
            cooldown_ms: None,
        }
    }
}
