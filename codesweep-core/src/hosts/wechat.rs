//! Notification channel adapter (WeChat Work group webhook)
//!
//! The webhook returns HTTP 200 with an application-level `errcode`, so
//! both the HTTP status and the body decide whether a send succeeded.
//! A non-zero errcode means the channel refused the payload, which is
//! terminal; transport failures and 5xx are retryable.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::NotifyConfig;
use crate::error::{DeliveryError, Error, Result};

/// Capability interface over the notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one markdown message
    async fn send_markdown(&self, content: &str) -> std::result::Result<(), DeliveryError>;
}

/// HTTP client for a WeChat Work group-robot webhook
pub struct WeChatNotifier {
    http_client: reqwest::Client,
    webhook_url: String,
}

impl WeChatNotifier {
    /// Create a new notifier from configuration
    ///
    /// Returns an error if no webhook URL is configured.
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let webhook_url = config
            .webhook_url
            .clone()
            .ok_or_else(|| Error::Config("notify.webhook_url is required".to_string()))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for WeChatNotifier {
    async fn send_markdown(&self, content: &str) -> std::result::Result<(), DeliveryError> {
        let payload = serde_json::json!({
            "msgtype": "markdown",
            "markdown": { "content": content },
        });

        let response = self
            .http_client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::TransientNetwork(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(DeliveryError::Rejected(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }
        if !status.is_success() {
            return Err(DeliveryError::TransientNetwork(format!(
                "API error ({})",
                status
            )));
        }

        let body: WebhookResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::TransientNetwork(format!("malformed response: {}", e)))?;

        if body.errcode != 0 {
            return Err(DeliveryError::Rejected(format!(
                "errcode {}: {}",
                body.errcode, body.errmsg
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}
