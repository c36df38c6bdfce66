// 邮件通道（SendGrid v3 HTTP API）

use super::channel::NotificationChannel;
use super::message::NotificationMessage;
use async_trait::async_trait;
use common::{MonitorError, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
pub const DEFAULT_FROM_EMAIL: &str = "noreply@bandwidth-monitor.com";

#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl EmailConfig {
    /// SendGrid 的 key 以 `SG.` 开头，同时需要收件人
    pub fn is_configured(&self) -> bool {
        let key_valid = self
            .api_key
            .as_deref()
            .is_some_and(|key| key.starts_with("SG."));
        let has_recipient = self.to.as_deref().is_some_and(|to| !to.trim().is_empty());
        key_valid && has_recipient
    }
}

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: String,
}

pub struct EmailChannel {
    client: Client,
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(client: Client, config: EmailConfig) -> Self {
        if !config.is_configured() {
            info!("SendGrid not configured or invalid API key, email notifications disabled");
        }
        Self { client, config }
    }

    fn build_request<'a>(&'a self, to: &'a str, message: &'a NotificationMessage) -> SendGridRequest<'a> {
        SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![Address { email: to }],
            }],
            from: Address {
                email: self.config.from.as_deref().unwrap_or(DEFAULT_FROM_EMAIL),
            },
            subject: &message.title,
            content: vec![
                Content {
                    content_type: "text/plain",
                    value: message.body.clone(),
                },
                Content {
                    content_type: "text/html",
                    value: format!("<p>{}</p>", message.body),
                },
            ],
        }
    }

    fn failure(&self, reason: String) -> MonitorError {
        MonitorError::ChannelDelivery {
            channel: self.name().to_string(),
            reason,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<()> {
        let (Some(api_key), Some(to)) = (self.config.api_key.as_deref(), self.config.to.as_deref())
        else {
            return Err(self.failure("email channel not configured".to_string()));
        };

        let response = self
            .client
            .post(SENDGRID_ENDPOINT)
            .bearer_auth(api_key)
            .json(&self.build_request(to, message))
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("SendGrid rejected email: HTTP {}", status);
            return Err(self.failure(format!("HTTP {}: {}", status, error_text)));
        }

        info!("Email notification sent to {}", to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::AlertJob;
    use chrono::Utc;
    use common::AlertEvent;

    fn config(key: &str, to: Option<&str>) -> EmailConfig {
        EmailConfig {
            api_key: Some(key.to_string()),
            from: None,
            to: to.map(str::to_string),
        }
    }

    #[test]
    fn test_email_configuration_rules() {
        assert!(config("SG.abc", Some("ops@example.com")).is_configured());
        assert!(!config("abc", Some("ops@example.com")).is_configured());
        assert!(!config("SG.abc", None).is_configured());
        assert!(!config("SG.abc", Some("  ")).is_configured());
        assert!(!EmailConfig::default().is_configured());
    }

    #[test]
    fn test_sendgrid_request_shape() {
        let channel = EmailChannel::new(Client::new(), config("SG.abc", Some("ops@example.com")));
        let job = AlertJob::drop_alert("home", AlertEvent::new(3, 10.0, 4.0, Utc::now()));
        let message = NotificationMessage::drop_alert(&job);

        let request = channel.build_request("ops@example.com", &message);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["personalizations"][0]["to"][0]["email"], "ops@example.com");
        assert_eq!(json["from"]["email"], DEFAULT_FROM_EMAIL);
        assert_eq!(json["subject"], "Bandwidth Drop Detected");
        assert_eq!(json["content"][0]["type"], "text/plain");
        assert_eq!(json["content"][0]["value"], message.body.as_str());
    }

    #[tokio::test]
    async fn test_unconfigured_email_refuses_delivery() {
        let channel = EmailChannel::new(Client::new(), EmailConfig::default());
        let job = AlertJob::drop_alert("home", AlertEvent::new(3, 10.0, 4.0, Utc::now()));
        let result = channel.deliver(&NotificationMessage::drop_alert(&job)).await;
        assert!(matches!(result, Err(MonitorError::ChannelDelivery { .. })));
    }
}
