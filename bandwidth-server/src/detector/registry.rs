use super::clock::Clock;
use super::config::{DetectorConfig, DetectorConfigUpdate};
use super::drop_detector::{DropDetector, DropResult};
use common::{MonitorError, Result, Sample, Settings};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// 未指定目标时使用的目标ID
pub const DEFAULT_TARGET: &str = "default";

const MAX_TARGET_LEN: usize = 64;

/// 检测器快照（用于API返回）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorSnapshot {
    pub target: String,
    pub config: DetectorConfig,
    pub window: Vec<Sample>,
    pub last_alert_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// 检测器注册表
///
/// 每个监控目标一个检测器，首次收到该目标的采样时创建。
/// 同一目标的采样通过互斥锁串行处理，不同目标互不影响。
#[derive(Clone)]
pub struct DetectorRegistry {
    detectors: Arc<DashMap<String, Arc<Mutex<DropDetector>>>>,
    /// 新目标使用的配置
    defaults: Arc<RwLock<DetectorConfig>>,
    clock: Arc<dyn Clock>,
}

impl DetectorRegistry {
    pub fn new(defaults: DetectorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        defaults.validate()?;
        Ok(Self {
            detectors: Arc::new(DashMap::new()),
            defaults: Arc::new(RwLock::new(defaults)),
            clock,
        })
    }

    pub fn validate_target(target: &str) -> Result<()> {
        let valid = !target.is_empty()
            && target.len() <= MAX_TARGET_LEN
            && target
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(MonitorError::InvalidSample(format!(
                "invalid target id {:?}",
                target
            )))
        }
    }

    fn defaults(&self) -> DetectorConfig {
        *self.defaults.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 获取目标的检测器，不存在则创建
    fn detector(&self, target: &str) -> Result<Arc<Mutex<DropDetector>>> {
        if let Some(existing) = self.detectors.get(target) {
            return Ok(existing.value().clone());
        }

        Self::validate_target(target)?;
        let entry = self
            .detectors
            .entry(target.to_string())
            .or_try_insert_with(|| {
                info!("Registering detector for target {}", target);
                DropDetector::with_clock(self.defaults(), self.clock.clone())
                    .map(|detector| Arc::new(Mutex::new(detector)))
            })?;
        Ok(entry.value().clone())
    }

    /// 把采样交给目标的检测器
    pub async fn add_sample(&self, target: &str, sample: Sample) -> Result<DropResult> {
        let detector = self.detector(target)?;
        let mut detector = detector.lock().await;
        let result = detector.add_sample(sample)?;
        if result.is_detected() {
            debug!("Detector for {} fired", target);
        }
        Ok(result)
    }

    /// 更新单个目标的检测配置
    pub async fn update_target(
        &self,
        target: &str,
        update: &DetectorConfigUpdate,
    ) -> Result<DetectorConfig> {
        let detector = self.detector(target)?;
        let mut detector = detector.lock().await;
        detector.update_config(update)
    }

    /// 把设置面板的值应用到默认配置和所有现存检测器
    pub async fn apply_settings(&self, settings: &Settings) -> Result<()> {
        let next_defaults = self.defaults().with_settings(settings);
        next_defaults.validate()?;
        *self.defaults.write().unwrap_or_else(PoisonError::into_inner) = next_defaults;

        // 先取出快照再逐个加锁，避免持有分片锁跨 await
        let detectors: Vec<(String, Arc<Mutex<DropDetector>>)> = self
            .detectors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let update = DetectorConfigUpdate::from(settings);
        for (target, detector) in detectors {
            let mut detector = detector.lock().await;
            if let Err(e) = detector.update_config(&update) {
                error!("Failed to apply settings to target {}: {}", target, e);
            }
        }

        info!("Applied settings to default config and live detectors");
        Ok(())
    }

    pub async fn snapshot(&self, target: &str) -> Option<DetectorSnapshot> {
        let detector = self.detectors.get(target)?.value().clone();
        let detector = detector.lock().await;
        Some(DetectorSnapshot {
            target: target.to_string(),
            config: detector.config(),
            window: detector.snapshot(),
            last_alert_time: detector.last_alert_time(),
        })
    }

    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .detectors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        targets.sort();
        targets
    }

    pub fn default_config(&self) -> DetectorConfig {
        self.defaults()
    }
}
