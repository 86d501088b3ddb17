//! PagerDuty Events API v2 notifier.
//!
//! Every alert becomes a `trigger` event whose `dedup_key` is the alert's
//! dedup key, so PagerDuty folds repeats into one incident.

use guardian_core::{Alert, Severity};

use crate::traits::{Notifier, NotifyError};
use crate::webhook::resolve_env_vars;

pub const DEFAULT_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

fn pd_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

#[derive(Debug)]
pub struct PagerDutyNotifier {
    routing_key: String,
    events_url: String,
    source: String,
    client: reqwest::Client,
}

impl PagerDutyNotifier {
    /// `routing_key` may be a `${VAR}` reference. `events_url` defaults to
    /// [`DEFAULT_EVENTS_URL`], `source` to `"workload-guardian"`.
    pub fn from_config(
        routing_key: String,
        events_url: Option<String>,
        source: Option<String>,
    ) -> Result<Self, NotifyError> {
        let routing_key = resolve_env_vars(&routing_key)?;
        if routing_key.is_empty() {
            return Err(NotifyError::Config(
                "PagerDuty routing key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            routing_key,
            events_url: events_url.unwrap_or_else(|| DEFAULT_EVENTS_URL.to_string()),
            source: source.unwrap_or_else(|| "workload-guardian".to_string()),
            client: reqwest::Client::new(),
        })
    }

    fn event(&self, alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "dedup_key": alert.key,
            "payload": {
                "summary": alert.title,
                "source": self.source,
                "severity": pd_severity(alert.severity),
                "timestamp": alert.timestamp.to_rfc3339(),
                "component": alert.workload.name,
                "group": alert.workload.namespace,
                "class": alert.kind.key_suffix(),
                "custom_details": {
                    "message": alert.message,
                    "monitor": alert.monitor,
                    "context": alert.context,
                },
            },
        })
    }
}

#[async_trait::async_trait]
impl Notifier for PagerDutyNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let event = self.event(alert);
        let response = self.client.post(&self.events_url).json(&event).send().await?;
        let status = response.status();

        // Events v2 answers 202 Accepted on success.
        if status.is_success() {
            tracing::debug!(key = %alert.key, "PagerDuty event accepted");
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NotifyError::RateLimited {
                retry_after_secs: 60,
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
        "pagerduty"
    }
}
