use crate::detector::DetectorConfig;
use crate::fanout::DEFAULT_CAPACITY;
use crate::notify::{EmailConfig, PushConfig};
use crate::queue::{QueueConfig, RetryPolicy, RetryStrategy};
use anyhow::{Context, Result};
use common::Settings;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub settings: Settings,
    pub detector: DetectorConfig,
    pub email: EmailConfig,
    pub push: PushConfig,
    /// 为空时使用内存日志，重启后未投递的告警会丢失
    pub journal_path: Option<PathBuf>,
    pub workers: usize,
    pub queue: QueueConfig,
    pub channel_timeout: Duration,
    pub shutdown_grace: Duration,
    pub broadcast_capacity: usize,
}

impl Config {
    /// 从环境变量加载配置
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Settings::default();

        let settings = Settings {
            drop_threshold: env.parse("DROP_THRESHOLD_MBPS", defaults.drop_threshold)?,
            drop_detection_window: env
                .parse("DROP_DETECTION_WINDOW_SECONDS", defaults.drop_detection_window)?,
            drop_duration_threshold: env.parse(
                "DROP_DURATION_THRESHOLD_SECONDS",
                defaults.drop_duration_threshold,
            )?,
            alert_advance_minutes: env
                .parse("ALERT_ADVANCE_MINUTES", defaults.alert_advance_minutes)?,
        };

        let detector = DetectorConfig {
            cooldown_ms: env.parse("ALERT_COOLDOWN_MS", DetectorConfig::default().cooldown_ms)?,
            ..DetectorConfig::default()
        }
        .with_settings(&settings);
        detector.validate().context("invalid drop detection settings")?;

        let subscription = match env.string("PUSH_SUBSCRIPTION") {
            Some(raw) => Some(
                serde_json::from_str(&raw).context("PUSH_SUBSCRIPTION is not valid JSON")?,
            ),
            None => None,
        };

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env.parse("QUEUE_MAX_ATTEMPTS", default_retry.max_attempts)?,
            retry_strategy: env.parse::<RetryStrategy>(
                "QUEUE_RETRY_STRATEGY",
                default_retry.retry_strategy,
            )?,
            backoff_base: Duration::from_millis(
                env.parse("QUEUE_BACKOFF_BASE_MS", default_retry.backoff_base.as_millis() as u64)?,
            ),
            backoff_max: Duration::from_millis(
                env.parse("QUEUE_BACKOFF_MAX_MS", default_retry.backoff_max.as_millis() as u64)?,
            ),
        };
        if retry.max_attempts == 0 {
            anyhow::bail!("QUEUE_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            host: env.string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("PORT", 4000)?,
            settings,
            detector,
            email: EmailConfig {
                api_key: env.string("SENDGRID_API_KEY"),
                from: env.string("SENDGRID_FROM_EMAIL"),
                to: env.string("SENDGRID_TO_EMAIL"),
            },
            push: PushConfig {
                vapid_public_key: env.string("VAPID_PUBLIC_KEY"),
                vapid_private_key: env.string("VAPID_PRIVATE_KEY"),
                relay_url: env.string("PUSH_RELAY_URL"),
                subscription,
            },
            journal_path: env.string("QUEUE_JOURNAL_PATH").map(PathBuf::from),
            workers: env.parse("QUEUE_WORKERS", 2)?,
            queue: QueueConfig {
                max_pending: env.parse("QUEUE_MAX_PENDING", QueueConfig::default().max_pending)?,
                retry,
            },
            channel_timeout: Duration::from_millis(env.parse("CHANNEL_TIMEOUT_MS", 10_000)?),
            shutdown_grace: Duration::from_millis(env.parse("SHUTDOWN_GRACE_MS", 5_000)?),
            broadcast_capacity: env.parse("LIVE_BUFFER_SIZE", DEFAULT_CAPACITY)?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// 未设置或为空白都视为未设置
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid value {:?} for {}", raw, key)),
            None => Ok(default),
        }
    }
}
