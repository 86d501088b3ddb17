use std::time::Duration;

use serde::Serialize;

use guardian_core::{AlertKind, ExecutionRecord, Metrics};

/// One SLA target that the window failed to meet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaViolation {
    pub kind: AlertKind,
    pub message: String,
    /// Observed value: percent for success rate, seconds for durations.
    pub actual: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaResult {
    pub passed: bool,
    pub metrics: Metrics,
    pub violations: Vec<SlaViolation>,
}

impl SlaResult {
    pub fn violation(&self, kind: AlertKind) -> Option<&SlaViolation> {
        self.violations.iter().find(|v| v.kind == kind)
    }
}

/// Baseline vs current P95 of successful run durations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionResult {
    pub detected: bool,
    pub baseline_p95: Duration,
    pub current_p95: Duration,
    /// `(current - baseline) / baseline * 100`.
    pub percent_change: f64,
    /// `None` when regression detection is not configured.
    pub threshold_percent: Option<f64>,
    pub message: String,
}

/// A run that has been going for longer than the stuck threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckExecution {
    pub record: ExecutionRecord,
    pub running_for: Duration,
}
