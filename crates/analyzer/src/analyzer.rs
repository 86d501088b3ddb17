//! SLA analysis over execution history.
//!
//! Every operation is a read-only function of the store contents, the
//! workload's config and `now`. Not having enough history is reported as
//! [`AnalyzerError::InsufficientHistory`], never as a violation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use guardian_core::duration::format_duration;
use guardian_core::stats::{percentile, sorted_durations};
use guardian_core::{AlertKind, Metrics, TrackedWorkload, WorkloadId};
use guardian_schedule::{evaluate_dead_man, DeadManEvaluation, DeadManMode};
use guardian_storage::{window_start, ExecutionStore};

use crate::error::AnalyzerError;
use crate::types::{RegressionResult, SlaResult, SlaViolation, StuckExecution};

pub struct SlaAnalyzer {
    store: Arc<dyn ExecutionStore>,
}

impl SlaAnalyzer {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Run statistics over the `window_days` ending at `now`.
    pub async fn get_metrics(
        &self,
        workload: &WorkloadId,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Metrics, AnalyzerError> {
        Ok(self
            .store
            .get_metrics(workload, window_start(now, window_days))
            .await?)
    }

    /// Check success rate and P95 duration against the workload's SLA.
    pub async fn check_sla(
        &self,
        workload: &TrackedWorkload,
        now: DateTime<Utc>,
    ) -> Result<SlaResult, AnalyzerError> {
        let cfg = &workload.config.sla;
        let metrics = self.get_metrics(&workload.id, cfg.window_days, now).await?;

        let needed = cfg.min_runs.max(1);
        if metrics.total_runs < needed {
            return Err(AnalyzerError::InsufficientHistory {
                needed,
                found: metrics.total_runs,
            });
        }

        let mut violations = Vec::new();

        if metrics.success_rate < cfg.min_success_rate {
            violations.push(SlaViolation {
                kind: AlertKind::SlaSuccessRate,
                message: format!(
                    "Success rate {:.1}% is below {:.1}% over {} day(s) ({} of {} runs failed)",
                    metrics.success_rate,
                    cfg.min_success_rate,
                    cfg.window_days,
                    metrics.failed_runs,
                    metrics.total_runs
                ),
                actual: metrics.success_rate,
                threshold: cfg.min_success_rate,
            });
        }

        if let Some(max) = cfg.max_duration {
            if metrics.successful_runs > 0 && metrics.p95_duration > max {
                violations.push(SlaViolation {
                    kind: AlertKind::SlaMaxDuration,
                    message: format!(
                        "P95 duration {} exceeds the {} limit",
                        format_duration(metrics.p95_duration),
                        format_duration(max)
                    ),
                    actual: metrics.p95_duration.as_secs_f64(),
                    threshold: max.as_secs_f64(),
                });
            }
        }

        debug!(
            workload = %workload.id,
            success_rate = metrics.success_rate,
            violations = violations.len(),
            "sla checked"
        );

        Ok(SlaResult {
            passed: violations.is_empty(),
            metrics,
            violations,
        })
    }

    /// Evaluate the dead-man's switch.
    ///
    /// The reference point is the latest success known to either the store
    /// or the reconciler's status, then the workload's creation time.
    pub async fn check_dead_man_switch(
        &self,
        workload: &TrackedWorkload,
        now: DateTime<Utc>,
    ) -> Result<DeadManEvaluation, AnalyzerError> {
        let cfg = &workload.config.dead_man;
        if !cfg.enabled {
            return Ok(DeadManEvaluation {
                triggered: false,
                mode: DeadManMode::Disabled,
                missed_count: 0,
                deadline: None,
                expected_interval: None,
                elapsed: Duration::ZERO,
                message: "Dead-man's switch disabled".to_string(),
            });
        }

        let stored = self.store.get_last_success(&workload.id).await?;
        let reference = stored
            .max(workload.status.last_success_time)
            .or(workload.created_at)
            .ok_or(AnalyzerError::InsufficientHistory { needed: 1, found: 0 })?;

        Ok(evaluate_dead_man(
            &workload.schedule,
            workload.timezone.as_deref(),
            reference,
            now,
            cfg,
        )?)
    }

    /// Compare the recent P95 of successful runs to a longer baseline.
    ///
    /// The baseline covers `regression_baseline_days`, the current window
    /// `regression_current_days`, both ending at `now`. Regression is
    /// detected only when the change is strictly above the threshold.
    pub async fn check_duration_regression(
        &self,
        workload: &TrackedWorkload,
        now: DateTime<Utc>,
    ) -> Result<RegressionResult, AnalyzerError> {
        let cfg = &workload.config.sla;

        let baseline_runs = self
            .store
            .get_executions(&workload.id, window_start(now, cfg.regression_baseline_days))
            .await?;
        let current_start = window_start(now, cfg.regression_current_days);

        let baseline = sorted_durations(&baseline_runs, true);
        let current = sorted_durations(
            baseline_runs.iter().filter(|r| r.start_time >= current_start),
            true,
        );

        let needed = cfg.min_runs.max(1);
        if baseline.len() < needed || current.is_empty() {
            return Err(AnalyzerError::InsufficientHistory {
                needed,
                found: baseline.len().min(current.len()),
            });
        }

        let (Some(baseline_p95), Some(current_p95)) =
            (percentile(&baseline, 95.0), percentile(&current, 95.0))
        else {
            return Err(AnalyzerError::InsufficientHistory { needed, found: 0 });
        };
        if baseline_p95.is_zero() {
            return Err(AnalyzerError::InsufficientHistory { needed, found: 0 });
        }

        let base = baseline_p95.as_secs_f64();
        let percent_change = (current_p95.as_secs_f64() - base) / base * 100.0;
        let threshold = cfg.regression_threshold_percent;
        let detected = threshold.is_some_and(|t| percent_change > t);

        let message = format!(
            "P95 duration {} vs baseline {} ({:+.1}%, threshold {})",
            format_duration(current_p95),
            format_duration(baseline_p95),
            percent_change,
            threshold.map_or_else(|| "off".to_string(), |t| format!("{t:.1}%")),
        );

        Ok(RegressionResult {
            detected,
            baseline_p95,
            current_p95,
            percent_change,
            threshold_percent: threshold,
            message,
        })
    }

    /// Runs still going after `threshold`, oldest first.
    pub async fn check_stuck(
        &self,
        workload: &WorkloadId,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<StuckExecution>, AnalyzerError> {
        let running = self.store.get_running(workload).await?;
        Ok(running
            .into_iter()
            .filter_map(|record| {
                let running_for = record.elapsed(now);
                (running_for > threshold).then_some(StuckExecution {
                    record,
                    running_for,
                })
            })
            .collect())
    }
}
