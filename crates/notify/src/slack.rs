//! Slack incoming-webhook notifier.
//!
//! Posts one message per alert with a severity-coloured attachment carrying
//! the workload, kind and alert context as fields.

use guardian_core::{Alert, Severity};

use crate::traits::{Notifier, NotifyError};
use crate::webhook::resolve_env_vars;

/// Attachment colour for a severity.
pub fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#d00000",
        Severity::Warning => "#f2c744",
        Severity::Info => "#439fe0",
    }
}

/// Sends alerts to a Slack incoming webhook.
#[derive(Debug)]
pub struct SlackNotifier {
    webhook_url: String,
    channel: Option<String>,
    username: Option<String>,
    client: reqwest::Client,
}

impl SlackNotifier {
    /// `webhook_url` may contain `${VAR}` references, resolved now.
    pub fn from_config(
        webhook_url: String,
        channel: Option<String>,
        username: Option<String>,
    ) -> Result<Self, NotifyError> {
        let resolved = resolve_env_vars(&webhook_url)?;
        if resolved.is_empty() {
            return Err(NotifyError::Config(
                "Slack webhook URL must not be empty".to_string(),
            ));
        }

        Ok(Self {
            webhook_url: resolved,
            channel,
            username,
            client: reqwest::Client::new(),
        })
    }

    fn payload(&self, alert: &Alert) -> serde_json::Value {
        let mut fields = vec![
            serde_json::json!({ "title": "Workload", "value": alert.workload.to_string(), "short": true }),
            serde_json::json!({ "title": "Kind", "value": alert.kind.key_suffix(), "short": true }),
        ];
        fields.extend(alert.context.iter().map(|(k, v)| {
            serde_json::json!({ "title": k, "value": v, "short": true })
        }));

        let mut body = serde_json::json!({
            "text": format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title),
            "attachments": [{
                "color": severity_color(alert.severity),
                "text": alert.message,
                "fields": fields,
                "footer": alert.monitor,
                "ts": alert.timestamp.timestamp(),
            }],
        });

        if let Some(ref channel) = self.channel {
            body["channel"] = serde_json::Value::String(channel.clone());
        }
        if let Some(ref username) = self.username {
            body["username"] = serde_json::Value::String(username.clone());
        }
        body
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let body = self.payload(alert);

        tracing::debug!(key = %alert.key, channel = ?self.channel, "sending Slack message");

        let response = self.client.post(&self.webhook_url).json(&body).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30);
            return Err(NotifyError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(NotifyError::Status {
            status: status.as_u16(),
            body: text,
        })
    }

    fn channel_name(&self) -> &str {
        "slack"
    }
}
