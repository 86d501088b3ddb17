//! Fleet-wide detectors run by the periodic loops.
//!
//! - [`DeadManChecker`]: missed schedules and long suspensions
//! - [`SlaRecalculator`]: success rate, max duration and duration regression
//! - [`StuckJobChecker`]: runs that never finish
//!
//! All three share [`MonitorContext`] and the gating in [`eligibility`].

mod dead_man;
mod sla_recalc;
mod stuck;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use guardian_analyzer::SlaAnalyzer;
use guardian_core::{dedup_key, Alert, AlertKind, TrackedWorkload};
use guardian_notify::{DispatchOutcome, Dispatcher};
use guardian_schedule::active_window;
use guardian_storage::ExecutionStore;

use crate::provider::WorkloadProvider;

pub use dead_man::DeadManChecker;
pub use sla_recalc::SlaRecalculator;
pub use stuck::StuckJobChecker;

/// Collaborators shared by every coordinator.
#[derive(Clone)]
pub struct MonitorContext {
    pub provider: Arc<dyn WorkloadProvider>,
    pub analyzer: Arc<SlaAnalyzer>,
    pub dispatcher: Dispatcher,
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub skipped: usize,
    /// Detections handed to the dispatcher.
    pub alerted: usize,
    pub resolved: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    FeatureDisabled,
    Suspended,
    InMaintenance { window: String },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Whether a coordinator should evaluate `workload` now.
///
/// Checked in order: the coordinator's feature flag, suspension (unless
/// pausing is turned off), then maintenance windows.
pub fn eligibility(
    workload: &TrackedWorkload,
    feature_enabled: bool,
    now: DateTime<Utc>,
) -> Eligibility {
    if !feature_enabled {
        return Eligibility::FeatureDisabled;
    }
    if workload.suspended && workload.config.suspension.pause_monitoring {
        return Eligibility::Suspended;
    }
    if let Some(window) = active_window(
        &workload.config.maintenance_windows,
        now,
        workload.timezone.as_deref(),
    ) {
        return Eligibility::InMaintenance {
            window: window.name.clone(),
        };
    }
    Eligibility::Eligible
}

impl MonitorContext {
    pub fn new(
        provider: Arc<dyn WorkloadProvider>,
        analyzer: Arc<SlaAnalyzer>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            provider,
            analyzer,
            dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        self.analyzer.store()
    }

    /// Snapshot of the fleet; a provider error is logged and yields nothing.
    async fn workloads(&self, coordinator: &str) -> Option<Vec<TrackedWorkload>> {
        match self.provider.list().await {
            Ok(list) => Some(list),
            Err(e) => {
                warn!(coordinator, error = %e, "failed to list workloads");
                None
            }
        }
    }

    /// Hand a detection to the dispatcher unless the reconciler already
    /// records it as active. Returns whether it was sent or scheduled.
    async fn raise(&self, workload: &TrackedWorkload, alert: Alert) -> bool {
        if workload.has_active_alert(alert.kind) {
            debug!(
                workload = %workload.id,
                kind = %alert.kind,
                "alert already active, not re-raising"
            );
            return false;
        }

        let key = alert.key.clone();
        match self.dispatcher.dispatch(alert, &workload.config.alerting).await {
            Ok(DispatchOutcome::Sent(results)) => {
                let delivered = results.iter().filter(|r| r.success).count();
                info!(
                    workload = %workload.id,
                    key = %key,
                    delivered,
                    destinations = results.len(),
                    "alert dispatched"
                );
                true
            }
            Ok(DispatchOutcome::Pending) => {
                debug!(workload = %workload.id, key = %key, "alert scheduled");
                true
            }
            Ok(outcome) => {
                debug!(workload = %workload.id, key = %key, ?outcome, "alert not sent now");
                false
            }
            Err(e) => {
                warn!(workload = %workload.id, key = %key, error = %e, "dispatch rejected");
                false
            }
        }
    }

    /// Condition no longer holds: cancel any pending delay, clear
    /// suppression and mark stored history resolved. Returns whether
    /// anything was actually open.
    async fn resolve(&self, workload: &TrackedWorkload, kind: AlertKind) -> bool {
        let key = dedup_key(&workload.id, kind);
        let cancelled = self.dispatcher.cancel_pending_alert(&key);
        let cleared = self.dispatcher.clear_alert(&key);
        let stored = match self
            .store()
            .resolve_alert(kind, &workload.id.namespace, &workload.id.name)
            .await
        {
            Ok(changed) => changed,
            Err(e) => {
                warn!(workload = %workload.id, %kind, error = %e, "failed to resolve stored alert");
                false
            }
        };

        let resolved = cancelled || cleared || stored;
        if resolved {
            info!(workload = %workload.id, %kind, cancelled, "alert resolved");
        }
        resolved
    }
}
