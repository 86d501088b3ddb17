//! Destination definitions loaded from YAML.
//!
//! ```yaml
//! destinations:
//!   - name: ops-slack
//!     type: slack
//!     webhook_url: ${SLACK_OPS_WEBHOOK}
//!     rate_limit: { burst: 5, max_per_hour: 60 }
//!   - name: pager
//!     type: pagerduty
//!     routing_key: ${PD_ROUTING_KEY}
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::email::{EmailNotifier, SmtpSettings};
use crate::pagerduty::PagerDutyNotifier;
use crate::rate_limit::RateLimit;
use crate::slack::SlackNotifier;
use crate::templating::TemplateRenderer;
use crate::traits::{Notifier, NotifyError};
use crate::webhook::WebhookNotifier;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationsFile {
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// One named destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: DestinationKind,
    /// Overrides the process-wide default limit.
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationKind {
    Webhook {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
        #[serde(default)]
        body_template: Option<String>,
    },
    Slack {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        username: Option<String>,
    },
    PagerDuty {
        routing_key: String,
        #[serde(default)]
        events_url: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
    Email {
        smtp_host: String,
        #[serde(default)]
        smtp_port: Option<u16>,
        #[serde(default)]
        tls: Option<bool>,
        from: String,
        to: Vec<String>,
    },
}

impl DestinationsFile {
    pub fn load(path: &Path) -> Result<Self, NotifyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, NotifyError> {
        let file: Self = serde_yaml::from_str(raw)?;
        let mut seen = std::collections::HashSet::new();
        for dest in &file.destinations {
            if dest.name.is_empty() {
                return Err(NotifyError::Config("destination name must not be empty".into()));
            }
            if !seen.insert(dest.name.as_str()) {
                return Err(NotifyError::Config(format!(
                    "duplicate destination name: {}",
                    dest.name
                )));
            }
        }
        Ok(file)
    }
}

impl DestinationConfig {
    /// Construct the adapter for this destination.
    pub fn build_notifier(
        &self,
        renderer: &Arc<TemplateRenderer>,
    ) -> Result<Arc<dyn Notifier>, NotifyError> {
        let notifier: Arc<dyn Notifier> = match &self.kind {
            DestinationKind::Webhook {
                url,
                method,
                headers,
                body_template,
            } => Arc::new(WebhookNotifier::from_config(
                url.clone(),
                method.clone(),
                headers.clone(),
                body_template.clone(),
                Arc::clone(renderer),
            )?),
            DestinationKind::Slack {
                webhook_url,
                channel,
                username,
            } => Arc::new(SlackNotifier::from_config(
                webhook_url.clone(),
                channel.clone(),
                username.clone(),
            )?),
            DestinationKind::PagerDuty {
                routing_key,
                events_url,
                source,
            } => Arc::new(PagerDutyNotifier::from_config(
                routing_key.clone(),
                events_url.clone(),
                source.clone(),
            )?),
            DestinationKind::Email {
                smtp_host,
                smtp_port,
                tls,
                from,
                to,
            } => Arc::new(EmailNotifier::from_config(
                SmtpSettings {
                    host: smtp_host,
                    port: *smtp_port,
                    tls: *tls,
                    from,
                    to,
                },
                Arc::clone(renderer),
            )?),
        };
        Ok(notifier)
    }
}

/// Build and register every destination. A destination that fails to build
/// is logged and skipped; the names that were registered are returned.
pub fn register_destinations(
    dispatcher: &Dispatcher,
    file: &DestinationsFile,
    renderer: &Arc<TemplateRenderer>,
) -> Vec<String> {
    let mut registered = Vec::with_capacity(file.destinations.len());
    for dest in &file.destinations {
        match dest.build_notifier(renderer) {
            Ok(notifier) => {
                dispatcher.register_channel(dest.name.clone(), notifier, dest.rate_limit);
                registered.push(dest.name.clone());
            }
            Err(e) => {
                tracing::warn!(destination = %dest.name, error = %e, "skipping destination");
            }
        }
    }
    registered
}
