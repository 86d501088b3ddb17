//! Notifier trait definition and shared error types.

use guardian_core::{Alert, AlertKind, Severity, WorkloadId};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("destination returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// A destination adapter: turns an [`Alert`] into one outbound delivery.
///
/// Any error counts as a failed delivery for health tracking, whether or not
/// it is retryable. Retry and backoff, if any, belong to the adapter.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an alert through this channel.
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;

    /// Test connectivity with a sample alert.
    async fn test(&self) -> Result<(), NotifyError> {
        let alert = Alert::new(
            WorkloadId::new("guardian", "connectivity-test"),
            AlertKind::DeadManTriggered,
            "[TEST] Guardian notification test",
            "This is a test notification from the workload guardian.",
        )
        .with_severity(Severity::Info)
        .with_monitor("test");
        self.send(&alert).await
    }

    /// Channel type (e.g., "webhook", "email").
    fn channel_name(&self) -> &str;
}

/// Result of delivering one alert to a single destination.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub destination: String,
    pub success: bool,
    /// Dropped by the destination's rate limiter; nothing was sent.
    pub rate_limited: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
