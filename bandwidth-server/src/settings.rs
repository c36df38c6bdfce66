use crate::detector::DetectorRegistry;
use common::{Result, Settings, SettingsUpdate};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// 设置面板状态
///
/// 更新先整体校验，再同步到检测器注册表，最后才对外可见。
#[derive(Clone)]
pub struct SettingsStore {
    current: Arc<RwLock<Settings>>,
    registry: DetectorRegistry,
}

impl SettingsStore {
    pub fn new(initial: Settings, registry: DetectorRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
            registry,
        }
    }

    pub async fn get(&self) -> Settings {
        *self.current.read().await
    }

    pub async fn update(&self, update: &SettingsUpdate) -> Result<Settings> {
        // 写锁串行化并发更新
        let mut current = self.current.write().await;
        if update.is_empty() {
            return Ok(*current);
        }
        let next = update.apply_to(&current)?;
        if next == *current {
            return Ok(next);
        }

        self.registry.apply_settings(&next).await?;
        *current = next;
        info!(
            "Settings updated: threshold {} Mbps, window {}s, duration {}, advance {} min",
            next.drop_threshold,
            next.drop_detection_window,
            next.drop_duration_threshold,
            next.alert_advance_minutes
        );
        Ok(next)
    }
}
