use async_trait::async_trait;
use tracing::{error, info, warn};

/// Alert delivery sink. Grounded on the teacher's `post_alert_webhook`
/// (`integration-gateway/src/alerts.rs`), generalized into a trait so the
/// gateway can register more than one sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), String>;
}

/// Always-available fallback notifier: writes the alert through
/// `tracing` at a severity-appropriate level.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), String> {
        info!(subject, body, "alert notification");
        Ok(())
    }
}

/// Posts the alert as a JSON body to a webhook URL with a bearer token,
/// the same shape as the teacher's `post_alert_webhook`.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: String, bearer: Option<String>) -> Self {
        WebhookNotifier { client, url, bearer }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), String> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "subject": subject, "body": body }));
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }
        match request.send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                let status = resp.status();
                warn!(%status, "webhook notifier received non-success status");
                Err(format!("webhook returned status {status}"))
            }
            Err(err) => {
                error!(error = %err, "webhook notifier request failed");
                Err(err.to_string())
            }
        }
    }
}
