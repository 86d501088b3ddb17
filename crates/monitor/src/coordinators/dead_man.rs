use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use guardian_core::duration::format_duration;
use guardian_core::{Alert, AlertKind, TrackedWorkload};
use guardian_schedule::{active_window, DeadManEvaluation};

use super::{eligibility, Eligibility, MonitorContext, TickSummary};
use crate::runner::Check;
use crate::suspension::{Observation, SuspensionTracker};

const MONITOR: &str = "dead-man";

/// Raises `DeadManTriggered` when a workload misses its schedule and
/// `SuspendedTooLong` when it stays suspended past its threshold.
pub struct DeadManChecker {
    ctx: MonitorContext,
    suspensions: Arc<SuspensionTracker>,
}

impl DeadManChecker {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            suspensions: Arc::new(SuspensionTracker::new()),
        }
    }

    pub fn suspensions(&self) -> &SuspensionTracker {
        &self.suspensions
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        let Some(workloads) = self.ctx.workloads(MONITOR).await else {
            summary.errors += 1;
            return summary;
        };

        let known: HashSet<_> = workloads.iter().map(|w| w.id.clone()).collect();
        self.suspensions.retain_known(&known);

        for workload in &workloads {
            self.track_suspension(workload, now, &mut summary).await;

            let gate = eligibility(workload, workload.config.dead_man.enabled, now);
            if gate != Eligibility::Eligible {
                debug!(workload = %workload.id, reason = ?gate, "dead-man check skipped");
                summary.skipped += 1;
                continue;
            }
            summary.evaluated += 1;

            match self.ctx.analyzer.check_dead_man_switch(workload, now).await {
                Ok(eval) if eval.triggered => {
                    if self.ctx.raise(workload, dead_man_alert(workload, &eval, now)).await {
                        summary.alerted += 1;
                    }
                }
                Ok(_) => {
                    if self.ctx.resolve(workload, AlertKind::DeadManTriggered).await {
                        summary.resolved += 1;
                    }
                }
                Err(e) if e.is_insufficient_history() => {
                    debug!(workload = %workload.id, "no success or creation time yet");
                }
                Err(e) => {
                    warn!(workload = %workload.id, error = %e, "dead-man check failed");
                    summary.errors += 1;
                }
            }
        }
        summary
    }

    async fn track_suspension(
        &self,
        workload: &TrackedWorkload,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        match self.suspensions.observe(&workload.id, workload.suspended, now) {
            Observation::Resumed => {
                if self.ctx.resolve(workload, AlertKind::SuspendedTooLong).await {
                    summary.resolved += 1;
                }
            }
            Observation::StillSuspended { since, duration } => {
                let Some(limit) = workload.config.suspension.alert_if_suspended_for else {
                    return;
                };
                if duration < limit {
                    return;
                }
                let windows = &workload.config.maintenance_windows;
                if active_window(windows, now, workload.timezone.as_deref()).is_some() {
                    return;
                }
                let alert = Alert::new(
                    workload.id.clone(),
                    AlertKind::SuspendedTooLong,
                    format!("{} suspended for {}", workload.id, format_duration(duration)),
                    format!(
                        "Workload has been suspended since {} ({} limit)",
                        since.to_rfc3339(),
                        format_duration(limit)
                    ),
                )
                .with_monitor(MONITOR)
                .with_context("suspended_since", since.to_rfc3339())
                .with_context("suspended_for", format_duration(duration))
                .with_timestamp(now);
                if self.ctx.raise(workload, alert).await {
                    summary.alerted += 1;
                }
            }
            Observation::FirstSeen | Observation::NotSuspended => {}
        }
    }
}

fn dead_man_alert(workload: &TrackedWorkload, eval: &DeadManEvaluation, now: DateTime<Utc>) -> Alert {
    let mut alert = Alert::new(
        workload.id.clone(),
        AlertKind::DeadManTriggered,
        format!("No successful run of {}", workload.id),
        eval.message.clone(),
    )
    .with_monitor(MONITOR)
    .with_context("mode", format!("{:?}", eval.mode))
    .with_context("missed_count", eval.missed_count)
    .with_context("since_last_success", format_duration(eval.elapsed))
    .with_timestamp(now);

    if let Some(deadline) = eval.deadline {
        alert = alert.with_context("deadline", deadline.to_rfc3339());
    }
    if let Some(interval) = eval.expected_interval {
        alert = alert.with_context("expected_interval", format_duration(interval));
    }
    alert
}

#[async_trait]
impl Check for DeadManChecker {
    fn name(&self) -> &str {
        MONITOR
    }

    async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        DeadManChecker::tick(self, now).await
    }
}
