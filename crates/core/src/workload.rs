//! Tracked workloads and their per-workload monitoring configuration.
//!
//! These types are owned by the external reconciler; the guardian only reads
//! them. Every config section implements `Default` so partial YAML documents
//! deserialize.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertKind, Severity};
use crate::duration::{format_duration, humanized, humanized_opt, MAX_CONFIG_DURATION};
use crate::error::CoreError;

/// Longest SLA or regression window, in days.
pub const MAX_WINDOW_DAYS: u32 = 3_650;

/// Identity of a tracked workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
}

impl WorkloadId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A recurring job under monitoring, as seen through the reconciler's cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedWorkload {
    #[serde(flatten)]
    pub id: WorkloadId,
    /// Recurring-schedule (cron) expression, 5 or 6 fields.
    pub schedule: String,
    /// IANA timezone the schedule is evaluated in (UTC when absent).
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub suspended: bool,
    /// When the workload definition was created. Used as the dead-man
    /// reference point before any run has ever succeeded.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: MonitorConfig,
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl TrackedWorkload {
    pub fn new(id: WorkloadId, schedule: impl Into<String>) -> Self {
        Self {
            id,
            schedule: schedule.into(),
            timezone: None,
            suspended: false,
            created_at: None,
            config: MonitorConfig::default(),
            status: WorkloadStatus::default(),
        }
    }

    /// Whether the reconciler already recorded an unresolved alert of this kind.
    pub fn has_active_alert(&self, kind: AlertKind) -> bool {
        self.status.active_alerts.contains(&kind)
    }

    /// Reject settings no detector can act on sensibly.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidConfig {
            workload: self.id.to_string(),
            reason: reason.to_string(),
        };
        let sla = &self.config.sla;

        if self.schedule.trim().is_empty() {
            return Err(invalid("schedule is empty"));
        }
        if !(0.0..=100.0).contains(&sla.min_success_rate) {
            return Err(invalid("sla.min_success_rate must be within 0-100"));
        }
        if sla.window_days == 0 || sla.regression_baseline_days == 0 || sla.regression_current_days == 0 {
            return Err(invalid("sla window days must be at least 1"));
        }
        if sla.window_days.max(sla.regression_baseline_days) > MAX_WINDOW_DAYS {
            return Err(invalid(&format!("sla window days must not exceed {MAX_WINDOW_DAYS}")));
        }
        if sla.regression_current_days > sla.regression_baseline_days {
            return Err(invalid("sla.regression_current_days exceeds the baseline window"));
        }
        if self.config.dead_man.auto_from_schedule.missed_schedule_threshold == 0 {
            return Err(invalid("dead_man.auto_from_schedule.missed_schedule_threshold must be at least 1"));
        }
        if let Some(w) = self.config.maintenance_windows.iter().find(|w| w.duration.is_zero()) {
            return Err(invalid(&format!("maintenance window '{}' has zero duration", w.name)));
        }
        if let Some((field, _)) = self.config.durations().find(|(_, d)| *d > MAX_CONFIG_DURATION) {
            return Err(invalid(&format!(
                "{field} must not exceed {}",
                format_duration(MAX_CONFIG_DURATION)
            )));
        }
        Ok(())
    }
}

/// Cached status maintained by the reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadStatus {
    #[serde(default)]
    pub last_success_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_schedule_time: Option<DateTime<Utc>>,
    /// Alerts the reconciler currently considers open for this workload.
    #[serde(default)]
    pub active_alerts: Vec<AlertKind>,
}

/// Per-workload overrides for every detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub dead_man: DeadManConfig,
    pub sla: SlaConfig,
    pub stuck: StuckConfig,
    pub suspension: SuspensionConfig,
    pub maintenance_windows: Vec<MaintenanceWindow>,
    pub alerting: AlertingConfig,
}

// ── Dead-man's switch ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadManConfig {
    pub enabled: bool,
    /// Fixed mode: alert when no success for this long. Bypasses schedule
    /// inference entirely when set.
    #[serde(with = "humanized_opt")]
    pub max_time_since_last_success: Option<Duration>,
    pub auto_from_schedule: AutoIntervalConfig,
}

impl Default for DeadManConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_time_since_last_success: None,
            auto_from_schedule: AutoIntervalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoIntervalConfig {
    pub enabled: bool,
    /// Grace added to every expected occurrence's deadline.
    #[serde(with = "humanized")]
    pub buffer: Duration,
    /// Consecutive missed occurrences required before triggering.
    pub missed_schedule_threshold: u32,
}

impl Default for AutoIntervalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer: Duration::from_secs(3_600),
            missed_schedule_threshold: 1,
        }
    }
}

// ── SLA ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub enabled: bool,
    /// Minimum success rate in percent (0-100).
    pub min_success_rate: f64,
    /// Rolling window for success rate and metrics.
    pub window_days: u32,
    /// Absolute ceiling on a single run's duration.
    #[serde(with = "humanized_opt")]
    pub max_duration: Option<Duration>,
    /// Percent increase of P95 over baseline that counts as a regression.
    /// `None` disables regression detection.
    pub regression_threshold_percent: Option<f64>,
    pub regression_baseline_days: u32,
    pub regression_current_days: u32,
    /// Completed runs required before any SLA verdict is given.
    pub min_runs: usize,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_success_rate: 95.0,
            window_days: 7,
            max_duration: None,
            regression_threshold_percent: None,
            regression_baseline_days: 14,
            regression_current_days: 1,
            min_runs: 1,
        }
    }
}

// ── Stuck runs ────────────────────────────────────────────────

/// Fallback when neither a stuck threshold nor an SLA max duration is set.
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(2 * 3_600);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckConfig {
    pub enabled: bool,
    #[serde(with = "humanized_opt")]
    pub threshold: Option<Duration>,
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: None,
        }
    }
}

impl MonitorConfig {
    /// Every configured duration, labelled by where it came from.
    fn durations(&self) -> impl Iterator<Item = (String, Duration)> + '_ {
        let named = [
            ("dead_man.max_time_since_last_success", self.dead_man.max_time_since_last_success),
            ("dead_man.auto_from_schedule.buffer", Some(self.dead_man.auto_from_schedule.buffer)),
            ("sla.max_duration", self.sla.max_duration),
            ("stuck.threshold", self.stuck.threshold),
            ("suspension.alert_if_suspended_for", self.suspension.alert_if_suspended_for),
            ("alerting.suppress_duplicates_for", Some(self.alerting.suppress_duplicates_for)),
            ("alerting.alert_delay", self.alerting.alert_delay),
        ];
        named
            .into_iter()
            .filter_map(|(field, d)| d.map(|d| (field.to_string(), d)))
            .chain(self.maintenance_windows.iter().map(|w| {
                (format!("maintenance window '{}' duration", w.name), w.duration)
            }))
    }

    /// Stuck threshold: explicit value, then SLA max duration, then the default.
    pub fn stuck_threshold(&self) -> Duration {
        self.stuck
            .threshold
            .or(self.sla.max_duration)
            .unwrap_or(DEFAULT_STUCK_THRESHOLD)
    }
}

// ── Suspension ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspensionConfig {
    /// Skip detectors while the workload is suspended.
    pub pause_monitoring: bool,
    /// Raise `SuspendedTooLong` after the workload stays suspended this long.
    #[serde(with = "humanized_opt")]
    pub alert_if_suspended_for: Option<Duration>,
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            pause_monitoring: true,
            alert_if_suspended_for: None,
        }
    }
}

// ── Maintenance windows ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    #[serde(default)]
    pub name: String,
    /// Cron expression marking each window start.
    pub schedule: String,
    #[serde(with = "humanized")]
    pub duration: Duration,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_true")]
    pub suppress_alerts: bool,
}

fn default_true() -> bool {
    true
}

// ── Alert routing ─────────────────────────────────────────────

/// Reference to a registered destination, optionally limited to some severities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRef {
    pub name: String,
    /// Empty means every severity.
    #[serde(default)]
    pub severities: Vec<Severity>,
}

impl DestinationRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severities: Vec::new(),
        }
    }

    pub fn with_severities(mut self, severities: Vec<Severity>) -> Self {
        self.severities = severities;
        self
    }

    pub fn accepts(&self, severity: Severity) -> bool {
        self.severities.is_empty() || self.severities.contains(&severity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub destinations: Vec<DestinationRef>,
    #[serde(with = "humanized")]
    pub suppress_duplicates_for: Duration,
    #[serde(with = "humanized_opt")]
    pub alert_delay: Option<Duration>,
    pub severity_overrides: HashMap<AlertKind, Severity>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            suppress_duplicates_for: Duration::from_secs(3_600),
            alert_delay: None,
            severity_overrides: HashMap::new(),
        }
    }
}

impl AlertingConfig {
    /// Effective severity for an alert kind after overrides.
    pub fn severity_for(&self, kind: AlertKind) -> Severity {
        self.severity_overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_severity())
    }
}
