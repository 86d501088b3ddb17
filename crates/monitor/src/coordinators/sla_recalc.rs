use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use guardian_analyzer::{RegressionResult, SlaViolation};
use guardian_core::duration::format_duration;
use guardian_core::{Alert, AlertKind, TrackedWorkload};

use super::{eligibility, Eligibility, MonitorContext, TickSummary};
use crate::runner::Check;

const MONITOR: &str = "sla-recalc";

/// Re-evaluates SLA targets and duration regression for every workload.
/// Meant to run on a single replica behind the leader gate.
pub struct SlaRecalculator {
    ctx: MonitorContext,
}

impl SlaRecalculator {
    pub fn new(ctx: MonitorContext) -> Self {
        Self { ctx }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        let Some(workloads) = self.ctx.workloads(MONITOR).await else {
            summary.errors += 1;
            return summary;
        };

        for workload in &workloads {
            let gate = eligibility(workload, workload.config.sla.enabled, now);
            if gate != Eligibility::Eligible {
                debug!(workload = %workload.id, reason = ?gate, "sla check skipped");
                summary.skipped += 1;
                continue;
            }
            summary.evaluated += 1;

            self.check_targets(workload, now, &mut summary).await;
            if workload.config.sla.regression_threshold_percent.is_some() {
                self.check_regression(workload, now, &mut summary).await;
            }
        }
        summary
    }

    async fn check_targets(
        &self,
        workload: &TrackedWorkload,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        let result = match self.ctx.analyzer.check_sla(workload, now).await {
            Ok(result) => result,
            Err(e) if e.is_insufficient_history() => {
                debug!(workload = %workload.id, error = %e, "not enough runs for sla");
                return;
            }
            Err(e) => {
                warn!(workload = %workload.id, error = %e, "sla check failed");
                summary.errors += 1;
                return;
            }
        };

        for kind in [AlertKind::SlaSuccessRate, AlertKind::SlaMaxDuration] {
            match result.violation(kind) {
                Some(violation) => {
                    let alert = violation_alert(workload, violation, now)
                        .with_context("total_runs", result.metrics.total_runs)
                        .with_context("window_days", workload.config.sla.window_days);
                    if self.ctx.raise(workload, alert).await {
                        summary.alerted += 1;
                    }
                }
                None => {
                    if self.ctx.resolve(workload, kind).await {
                        summary.resolved += 1;
                    }
                }
            }
        }
    }

    async fn check_regression(
        &self,
        workload: &TrackedWorkload,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        match self.ctx.analyzer.check_duration_regression(workload, now).await {
            Ok(result) if result.detected => {
                if self.ctx.raise(workload, regression_alert(workload, &result, now)).await {
                    summary.alerted += 1;
                }
            }
            Ok(_) => {
                if self.ctx.resolve(workload, AlertKind::DurationRegression).await {
                    summary.resolved += 1;
                }
            }
            Err(e) if e.is_insufficient_history() => {
                debug!(workload = %workload.id, error = %e, "not enough runs for regression");
            }
            Err(e) => {
                warn!(workload = %workload.id, error = %e, "regression check failed");
                summary.errors += 1;
            }
        }
    }
}

fn violation_alert(workload: &TrackedWorkload, v: &SlaViolation, now: DateTime<Utc>) -> Alert {
    let title = match v.kind {
        AlertKind::SlaSuccessRate => format!("{} success rate below target", workload.id),
        _ => format!("{} runs exceed max duration", workload.id),
    };
    Alert::new(workload.id.clone(), v.kind, title, v.message.clone())
        .with_monitor(MONITOR)
        .with_context("actual", format!("{:.2}", v.actual))
        .with_context("threshold", format!("{:.2}", v.threshold))
        .with_timestamp(now)
}

fn regression_alert(workload: &TrackedWorkload, r: &RegressionResult, now: DateTime<Utc>) -> Alert {
    Alert::new(
        workload.id.clone(),
        AlertKind::DurationRegression,
        format!("{} is running {:.0}% slower", workload.id, r.percent_change),
        r.message.clone(),
    )
    .with_monitor(MONITOR)
    .with_context("baseline_p95", format_duration(r.baseline_p95))
    .with_context("current_p95", format_duration(r.current_p95))
    .with_context("percent_change", format!("{:.1}", r.percent_change))
    .with_timestamp(now)
}

#[async_trait]
impl Check for SlaRecalculator {
    fn name(&self) -> &str {
        MONITOR
    }

    async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        SlaRecalculator::tick(self, now).await
    }
}
