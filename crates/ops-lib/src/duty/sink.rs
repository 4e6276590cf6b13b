//! Notification sinks

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use super::{Notification, NotificationSink};
use crate::error::{Error, Result};

/// Writes each notification as a structured log line
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        info!(
            event = "duty_notification",
            recipient_id = notification.recipient_id,
            recipient = %notification.recipient_login,
            alert = %notification.alert_name,
            matched_label = %notification.matched_label,
            text = %notification.text,
            "Duty notification"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a chat bridge or incoming webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: Client,
    url: Url,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::config(format!("invalid webhook URL '{url}': {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let response = self
            .http
            .post(self.url.clone())
            .json(notification)
            .send()
            .await
            .map_err(|e| Error::failed(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::failed(format!(
                "webhook returned {status}: {}",
                body.trim()
            )));
        }

        debug!(
            recipient = %notification.recipient_login,
            status = status.as_u16(),
            "Webhook notification delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn notification() -> Notification {
        Notification {
            recipient_id: 42,
            recipient_login: "alice".to_string(),
            alert_name: "HighLatency".to_string(),
            matched_label: "service=checkout".to_string(),
            text: "NOTIFICATION FOR: @alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/duty")
            .match_body(Matcher::PartialJsonString(
                r#"{"recipient_login": "alice", "alert_name": "HighLatency"}"#.to_string(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let sink = WebhookSink::new(
            &format!("{}/hooks/duty", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        sink.deliver(&notification()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let sink = WebhookSink::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = sink.deliver(&notification()).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        LogSink.deliver(&notification()).await.unwrap();
    }

    #[test]
    fn test_invalid_webhook_url() {
        assert!(WebhookSink::new("::nope", Duration::from_secs(1)).is_err());
    }
}
