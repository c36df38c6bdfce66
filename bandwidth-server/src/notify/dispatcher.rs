// 通知分发器
//
// 队列 worker 调用的处理器：把告警任务转成通知，并发投递到所有已配置通道。
// - 每个通道有独立超时，单个通道失败只记录日志
// - 所有已配置通道都失败时返回错误，由队列重试
// - 最近投递成功的任务ID缓存在 LRU 中，重复投递直接跳过

use super::channel::NotificationChannel;
use super::message::NotificationMessage;
use crate::queue::{AlertJob, JobHandler, DROP_JOB};
use async_trait::async_trait;
use common::{MonitorError, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DELIVERED_CACHE_SIZE: usize = 1024;

pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
    delivered: Mutex<LruCache<Uuid, ()>>,
}

impl NotificationDispatcher {
    /// # 参数
    ///
    /// - `channels`: 全部通道，未配置的通道会被忽略
    /// - `timeout`: 单个通道一次投递的超时时间
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(DELIVERED_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        let dispatcher = Self {
            channels,
            timeout,
            delivered: Mutex::new(LruCache::new(capacity)),
        };

        let configured = dispatcher.configured_channels();
        if configured.is_empty() {
            warn!("No notification channels configured, alerts will only be logged");
        } else {
            info!("Notification channels enabled: {}", configured.join(", "));
        }
        dispatcher
    }

    pub fn configured_channels(&self) -> Vec<&'static str> {
        self.channels
            .iter()
            .filter(|channel| channel.is_configured())
            .map(|channel| channel.name())
            .collect()
    }

    fn already_delivered(&self, id: &Uuid) -> bool {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn mark_delivered(&self, id: Uuid) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(id, ());
    }

    /// 按任务类型发送通知
    pub async fn send_notification(&self, kind: &str, job: &AlertJob) -> Result<()> {
        match kind {
            DROP_JOB => self.send_drop_alert(job).await,
            other => {
                warn!("Unknown notification type {:?} for job {}, dropping", other, job.id);
                Ok(())
            }
        }
    }

    async fn send_drop_alert(&self, job: &AlertJob) -> Result<()> {
        if self.already_delivered(&job.id) {
            debug!("Alert job {} already delivered, skipping", job.id);
            return Ok(());
        }

        let message = NotificationMessage::drop_alert(job);
        let configured: Vec<&Arc<dyn NotificationChannel>> = self
            .channels
            .iter()
            .filter(|channel| channel.is_configured())
            .collect();

        if configured.is_empty() {
            info!("No channels configured, alert for {}: {}", job.target, message.body);
            self.mark_delivered(job.id);
            return Ok(());
        }

        let deliveries = configured.iter().map(|channel| self.deliver_one(channel, &message));
        let results = futures::future::join_all(deliveries).await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|result| result.err())
            .collect();
        if failures.len() == configured.len() {
            return Err(MonitorError::AllChannelsFailed { failures });
        }

        self.mark_delivered(job.id);
        Ok(())
    }

    /// 在超时内投递到单个通道，失败时返回描述
    async fn deliver_one(
        &self,
        channel: &Arc<dyn NotificationChannel>,
        message: &NotificationMessage,
    ) -> std::result::Result<(), String> {
        let outcome = match tokio::time::timeout(self.timeout, channel.deliver(message)).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::ChannelDelivery {
                channel: channel.name().to_string(),
                reason: format!("timed out after {:?}", self.timeout),
            }),
        };

        outcome.map_err(|e| {
            let e = match e {
                MonitorError::ChannelDelivery { .. } => e,
                other => MonitorError::ChannelDelivery {
                    channel: channel.name().to_string(),
                    reason: other.to_string(),
                },
            };
            error!("{}", e);
            format!("{}: {}", channel.name(), e)
        })
    }
}

#[async_trait]
impl JobHandler for NotificationDispatcher {
    async fn handle(&self, job: &AlertJob) -> Result<()> {
        self.send_notification(&job.kind, job).await
    }
}
