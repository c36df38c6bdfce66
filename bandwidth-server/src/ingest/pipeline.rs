// 采样接入流水线
//
// 每个采样依次经过：解析校验 → 检测器 → 实时广播 → 落地；
// 检测到掉速时在释放检测器锁之后入告警队列。
// 入队失败只记录日志，不会让上报方的请求失败。

use super::sink::SampleSink;
use crate::detector::DetectorRegistry;
use crate::fanout::SampleBroadcaster;
use crate::queue::AlertQueue;
use common::{Result, Sample, SamplePayload};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// 单个采样的处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub detected: bool,
    /// 入队失败时为 None
    pub alert_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct IngestPipeline {
    registry: DetectorRegistry,
    broadcaster: SampleBroadcaster,
    queue: AlertQueue,
    sink: Arc<dyn SampleSink>,
}

impl IngestPipeline {
    pub fn new(
        registry: DetectorRegistry,
        broadcaster: SampleBroadcaster,
        queue: AlertQueue,
        sink: Arc<dyn SampleSink>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            queue,
            sink,
        }
    }

    /// 处理一条原始 JSON 载荷
    pub async fn ingest(&self, target: &str, payload: &str) -> Result<IngestOutcome> {
        let sample = SamplePayload::parse(payload)?;
        self.ingest_sample(target, sample).await
    }

    /// 处理已校验的采样
    pub async fn ingest_sample(&self, target: &str, sample: Sample) -> Result<IngestOutcome> {
        // 检测器锁只在这次调用内持有
        let result = self.registry.add_sample(target, sample).await?;

        self.broadcaster.publish(target, &sample);

        if let Err(e) = self.sink.record(target, &sample).await {
            warn!("Failed to record sample for {}: {}", target, e);
        }

        let Some(event) = result.into_event() else {
            return Ok(IngestOutcome::default());
        };

        warn!(
            "Bandwidth drop detected on {}: {} samples below {} Mbps (current {:.2} Mbps)",
            target, event.consecutive_drops, event.threshold, event.current_speed
        );

        match self.queue.enqueue(target, event).await {
            Ok(id) => Ok(IngestOutcome {
                detected: true,
                alert_id: Some(id),
            }),
            Err(e) => {
                error!("Failed to enqueue drop alert for {}, alert lost: {}", target, e);
                Ok(IngestOutcome {
                    detected: true,
                    alert_id: None,
                })
            }
        }
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &SampleBroadcaster {
        &self.broadcaster
    }

    pub fn queue(&self) -> &AlertQueue {
        &self.queue
    }
}
