use async_trait::async_trait;
use common::{Result, Sample};
use tracing::debug;

/// 采样落地接口（时序存储的边界）
///
/// 写入失败只记录日志，不影响检测与广播。
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn record(&self, target: &str, sample: &Sample) -> Result<()>;
}

/// 只写日志的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl SampleSink for LogSink {
    async fn record(&self, target: &str, sample: &Sample) -> Result<()> {
        debug!(
            target_id = target,
            download = sample.download,
            upload = sample.upload,
            timestamp = %sample.timestamp,
            "bandwidth sample"
        );
        Ok(())
    }
}
