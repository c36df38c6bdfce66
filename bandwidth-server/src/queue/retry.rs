use common::MonitorError;
use std::str::FromStr;
use std::time::Duration;

/// 重试退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// 立即重试
    Immediate,
    /// 指数退避
    ExponentialBackoff,
    /// 线性退避
    LinearBackoff,
}

impl FromStr for RetryStrategy {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(RetryStrategy::Immediate),
            "exponential" => Ok(RetryStrategy::ExponentialBackoff),
            "linear" => Ok(RetryStrategy::LinearBackoff),
            other => Err(MonitorError::InvalidConfig(format!(
                "unknown retry strategy {:?}, expected immediate, linear or exponential",
                other
            ))),
        }
    }
}

/// 告警任务重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大投递次数（含首次），达到后任务进入失败列表
    pub max_attempts: u32,
    pub retry_strategy: RetryStrategy,
    /// 基础退避时间
    pub backoff_base: Duration,
    /// 最大退避时间
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_strategy: RetryStrategy::ExponentialBackoff,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// 计算重试延迟
    ///
    /// # 参数
    ///
    /// - `attempt`: 已失败次数减一（从0开始）
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self.retry_strategy {
            RetryStrategy::Immediate => Duration::from_millis(0),

            RetryStrategy::LinearBackoff => {
                let delay = self.backoff_base.saturating_mul(attempt.saturating_add(1));
                delay.min(self.backoff_max)
            }

            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                let delay = self.backoff_base.saturating_mul(multiplier);
                delay.min(self.backoff_max)
            }
        }
    }

    /// 失败 `attempts` 次之后是否还能重试
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
