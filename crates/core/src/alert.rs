//! Alerts: the candidate notifications produced by detectors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workload::WorkloadId;

/// Alert severity. Ordered `Info` < `Warning` < `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The condition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertKind {
    DeadManTriggered,
    SuspendedTooLong,
    SlaSuccessRate,
    SlaMaxDuration,
    DurationRegression,
    JobStuck,
}

impl AlertKind {
    pub const ALL: [AlertKind; 6] = [
        AlertKind::DeadManTriggered,
        AlertKind::SuspendedTooLong,
        AlertKind::SlaSuccessRate,
        AlertKind::SlaMaxDuration,
        AlertKind::DurationRegression,
        AlertKind::JobStuck,
    ];

    /// Suffix appended to `namespace/name/` to form the dedup key.
    pub fn key_suffix(&self) -> &'static str {
        match self {
            AlertKind::DeadManTriggered => "DeadManTriggered",
            AlertKind::SuspendedTooLong => "SuspendedTooLong",
            AlertKind::SlaSuccessRate => "SLA/SuccessRate",
            AlertKind::SlaMaxDuration => "SLA/MaxDuration",
            AlertKind::DurationRegression => "SLA/DurationRegression",
            AlertKind::JobStuck => "JobStuck",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            AlertKind::DeadManTriggered | AlertKind::JobStuck => Severity::Critical,
            AlertKind::SuspendedTooLong
            | AlertKind::SlaSuccessRate
            | AlertKind::SlaMaxDuration
            | AlertKind::DurationRegression => Severity::Warning,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_suffix())
    }
}

/// Stable deduplication key for one logical alert condition.
pub fn dedup_key(workload: &WorkloadId, kind: AlertKind) -> String {
    format!("{}/{}", workload, kind.key_suffix())
}

/// Prefix shared by every dedup key of a workload.
pub fn workload_key_prefix(workload: &WorkloadId) -> String {
    format!("{}/", workload)
}

/// A candidate notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub key: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub workload: WorkloadId,
    /// Detector that raised the alert (e.g. `"dead-man"`).
    pub monitor: String,
    /// Supporting metrics and excerpts.
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Create an alert with a derived dedup key and the kind's default severity.
    pub fn new(
        workload: WorkloadId,
        kind: AlertKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: dedup_key(&workload, kind),
            kind,
            severity: kind.default_severity(),
            title: title.into(),
            message: message.into(),
            workload,
            monitor: String::new(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_monitor(mut self, monitor: impl Into<String>) -> Self {
        self.monitor = monitor.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_format() {
        let w = WorkloadId::new("prod", "report");
        assert_eq!(dedup_key(&w, AlertKind::SlaSuccessRate), "prod/report/SLA/SuccessRate");
        assert_eq!(dedup_key(&w, AlertKind::DeadManTriggered), "prod/report/DeadManTriggered");
        assert!(dedup_key(&w, AlertKind::JobStuck).starts_with(&workload_key_prefix(&w)));
    }

    #[test]
    fn new_alert_uses_default_severity() {
        let a = Alert::new(WorkloadId::new("a", "b"), AlertKind::JobStuck, "t", "m")
            .with_monitor("stuck")
            .with_context("elapsed", "3h");
        assert_eq!(a.severity, Severity::Critical);
        assert_eq!(a.monitor, "stuck");
        assert_eq!(a.context["elapsed"], "3h");
        assert_eq!(a.key, "a/b/JobStuck");
    }

    #[test]
    fn severity_ordering_and_serde() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }
}
