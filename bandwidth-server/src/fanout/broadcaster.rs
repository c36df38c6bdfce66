// 实时采样广播器
//
// 本模块把每个采样推送给当前在线的订阅者（WebSocket / SSE）。
// 采样只序列化一次，所有订阅者共享同一份 JSON。
// 推送尽力而为：跟不上的订阅者会丢掉积压的旧采样，只保留最新的。

use common::Sample;
use futures::stream::Stream;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, trace};

/// 默认广播通道容量，容量小意味着慢订阅者更快跳到最新采样
pub const DEFAULT_CAPACITY: usize = 16;

/// 广播帧
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub target: Arc<str>,
    /// 采样的 JSON 序列化结果
    pub payload: Arc<str>,
}

/// 采样广播器
#[derive(Clone)]
pub struct SampleBroadcaster {
    tx: broadcast::Sender<LiveFrame>,
}

impl SampleBroadcaster {
    /// 创建新的广播器
    ///
    /// # 参数
    ///
    /// - `capacity`: 每个订阅者最多积压的采样数
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 广播一个采样，返回收到的订阅者数量
    pub fn publish(&self, target: &str, sample: &Sample) -> usize {
        let payload = match serde_json::to_string(sample) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize sample for broadcast: {}", e);
                return 0;
            }
        };

        let frame = LiveFrame {
            target: Arc::from(target),
            payload: Arc::from(payload),
        };

        match self.tx.send(frame) {
            Ok(count) => {
                trace!("Broadcasted sample for {} to {} subscribers", target, count);
                count
            }
            // 没有订阅者
            Err(_) => 0,
        }
    }

    /// 订阅采样，只会收到订阅之后的采样
    pub fn subscribe(&self, filter: SubscriberFilter) -> LiveSubscription {
        debug!("New live subscriber ({:?})", filter);
        LiveSubscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// 以流的形式订阅（用于SSE）
    pub fn stream(&self, filter: SubscriberFilter) -> impl Stream<Item = Arc<str>> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |result| match result {
            Ok(frame) if filter.matches(&frame) => Some(frame.payload),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!("Live stream subscriber lagged, skipped {} samples", skipped);
                None
            }
        })
    }

    /// 获取订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// 单个订阅者
pub struct LiveSubscription {
    rx: broadcast::Receiver<LiveFrame>,
    filter: SubscriberFilter,
}

impl LiveSubscription {
    /// 等待下一个匹配的采样，广播器关闭时返回 None
    pub async fn next(&mut self) -> Option<Arc<str>> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if self.filter.matches(&frame) => return Some(frame.payload),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Live subscriber lagged, skipped {} samples", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// 订阅过滤器
///
/// 用于只订阅特定目标的采样
#[derive(Debug, Clone, Default)]
pub struct SubscriberFilter {
    target: Option<String>,
}

impl SubscriberFilter {
    pub fn new() -> Self {
        Self { target: None }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn matches(&self, frame: &LiveFrame) -> bool {
        match &self.target {
            Some(target) => target.as_str() == &*frame.target,
            None => true,
        }
    }
}
