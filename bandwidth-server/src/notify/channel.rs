use super::message::NotificationMessage;
use async_trait::async_trait;
use common::Result;

/// 通知通道
///
/// 每个通道独立配置、独立失败。未配置的通道不会被调用。
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_configured(&self) -> bool;

    async fn deliver(&self, message: &NotificationMessage) -> Result<()>;
}
