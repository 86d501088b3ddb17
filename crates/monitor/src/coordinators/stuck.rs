use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use guardian_core::duration::format_duration;
use guardian_core::{Alert, AlertKind};

use super::{eligibility, Eligibility, MonitorContext, TickSummary};
use crate::runner::Check;

const MONITOR: &str = "stuck";

/// Raises `JobStuck` while any run of a workload has been going for longer
/// than its stuck threshold.
pub struct StuckJobChecker {
    ctx: MonitorContext,
}

impl StuckJobChecker {
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
            let gate = eligibility(workload, workload.config.stuck.enabled, now);
            if gate != Eligibility::Eligible {
                debug!(workload = %workload.id, reason = ?gate, "stuck check skipped");
                summary.skipped += 1;
                continue;
            }
            summary.evaluated += 1;

            let threshold = workload.config.stuck_threshold();
            let stuck = match self.ctx.analyzer.check_stuck(&workload.id, threshold, now).await {
                Ok(stuck) => stuck,
                Err(e) => {
                    warn!(workload = %workload.id, error = %e, "stuck check failed");
                    summary.errors += 1;
                    continue;
                }
            };

            // Oldest first.
            let Some(oldest) = stuck.first() else {
                if self.ctx.resolve(workload, AlertKind::JobStuck).await {
                    summary.resolved += 1;
                }
                continue;
            };

            let alert = Alert::new(
                workload.id.clone(),
                AlertKind::JobStuck,
                format!("{} has a stuck run", workload.id),
                format!(
                    "{} has been running for {} (threshold {})",
                    oldest.record.job_name,
                    format_duration(oldest.running_for),
                    format_duration(threshold)
                ),
            )
            .with_monitor(MONITOR)
            .with_context("job", &oldest.record.job_name)
            .with_context("started", oldest.record.start_time.to_rfc3339())
            .with_context("running_for", format_duration(oldest.running_for))
            .with_context("stuck_runs", stuck.len())
            .with_timestamp(now);

            if self.ctx.raise(workload, alert).await {
                summary.alerted += 1;
            }
        }
        summary
    }
}

#[async_trait]
impl Check for StuckJobChecker {
    fn name(&self) -> &str {
        MONITOR
    }

    async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        StuckJobChecker::tick(self, now).await
    }
}
