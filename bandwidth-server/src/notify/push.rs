// Web Push 通道
//
// 推送签名与加密由外部推送中继完成，这里只把订阅和通知内容转交给中继。

use super::channel::NotificationChannel;
use super::message::NotificationMessage;
use async_trait::async_trait;
use common::{MonitorError, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

const PLACEHOLDER_PUBLIC_KEY: &str = "your-vapid-public-key-here";
const PLACEHOLDER_PRIVATE_KEY: &str = "your-vapid-private-key-here";

#[derive(Debug, Clone, Default)]
pub struct PushConfig {
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub relay_url: Option<String>,
    /// 浏览器的 PushSubscription JSON
    pub subscription: Option<serde_json::Value>,
}

impl PushConfig {
    pub fn is_configured(&self) -> bool {
        let public_ok = self
            .vapid_public_key
            .as_deref()
            .is_some_and(|key| !key.is_empty() && key != PLACEHOLDER_PUBLIC_KEY);
        let private_ok = self
            .vapid_private_key
            .as_deref()
            .is_some_and(|key| !key.is_empty() && key != PLACEHOLDER_PRIVATE_KEY);
        let relay_ok = self.relay_url.as_deref().is_some_and(|url| !url.is_empty());
        public_ok && private_ok && relay_ok && self.subscription.is_some()
    }
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    subscription: &'a serde_json::Value,
    payload: &'a NotificationMessage,
}

pub struct PushChannel {
    client: Client,
    config: PushConfig,
}

impl PushChannel {
    pub fn new(client: Client, config: PushConfig) -> Self {
        if !config.is_configured() {
            info!("Web Push not configured, push notifications disabled");
        }
        Self { client, config }
    }

    fn failure(&self, reason: String) -> MonitorError {
        MonitorError::ChannelDelivery {
            channel: self.name().to_string(),
            reason,
        }
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn name(&self) -> &'static str {
        "push"
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<()> {
        if !self.is_configured() {
            return Err(self.failure("push channel not configured".to_string()));
        }
        let (Some(relay_url), Some(subscription)) =
            (self.config.relay_url.as_deref(), self.config.subscription.as_ref())
        else {
            return Err(self.failure("push channel not configured".to_string()));
        };

        let response = self
            .client
            .post(relay_url)
            .json(&RelayRequest {
                subscription,
                payload: message,
            })
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Push relay rejected notification: HTTP {}", status);
            return Err(self.failure(format!("HTTP {}", status)));
        }

        info!("Web push notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configured() -> PushConfig {
        PushConfig {
            vapid_public_key: Some("BPub".to_string()),
            vapid_private_key: Some("priv".to_string()),
            relay_url: Some("http://127.0.0.1:9/push".to_string()),
            subscription: Some(json!({"endpoint": "https://push.example/abc"})),
        }
    }

    #[test]
    fn test_push_configuration_rules() {
        assert!(configured().is_configured());
        assert!(!PushConfig::default().is_configured());

        let mut placeholder = configured();
        placeholder.vapid_public_key = Some(PLACEHOLDER_PUBLIC_KEY.to_string());
        assert!(!placeholder.is_configured());

        let mut placeholder = configured();
        placeholder.vapid_private_key = Some(PLACEHOLDER_PRIVATE_KEY.to_string());
        assert!(!placeholder.is_configured());

        let mut no_subscription = configured();
        no_subscription.subscription = None;
        assert!(!no_subscription.is_configured());

        let mut no_relay = configured();
        no_relay.relay_url = None;
        assert!(!no_relay.is_configured());
    }
}
