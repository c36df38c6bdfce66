use crate::detector::DetectorRegistry;
use crate::fanout::SampleBroadcaster;
use crate::ingest::IngestPipeline;
use crate::queue::AlertQueue;
use crate::settings::SettingsStore;
use tokio_util::sync::CancellationToken;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub pipeline: IngestPipeline,
    pub registry: DetectorRegistry,
    pub broadcaster: SampleBroadcaster,
    pub queue: AlertQueue,
    pub settings: SettingsStore,
    /// 关闭时通知长连接退出
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        pipeline: IngestPipeline,
        settings: SettingsStore,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: pipeline.registry().clone(),
            broadcaster: pipeline.broadcaster().clone(),
            queue: pipeline.queue().clone(),
            pipeline,
            settings,
            shutdown,
        }
    }
}
