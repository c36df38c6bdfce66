use chrono::{DateTime, Utc};

/// 检测时刻来源
///
/// 冷却判断和告警时间戳都取自这里，测试中可替换为手动时钟。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
