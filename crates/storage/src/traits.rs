use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use guardian_core::{Alert, AlertKind, ExecutionRecord, Metrics, WorkloadId};

use crate::error::StoreError;

/// One dispatched alert, kept for history and resolution tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub alert: Alert,
    pub dispatched_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertRecord {
    pub fn new(alert: Alert, dispatched_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert,
            dispatched_at,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Filter for [`ExecutionStore::list_alert_history`].
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub workload: Option<WorkloadId>,
    pub kind: Option<AlertKind>,
    pub unresolved_only: bool,
    /// Most recent records first; `None` returns everything.
    pub limit: Option<usize>,
}

impl AlertQuery {
    pub fn for_workload(workload: WorkloadId) -> Self {
        Self {
            workload: Some(workload),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &AlertRecord) -> bool {
        self.workload.as_ref().map_or(true, |w| *w == record.alert.workload)
            && self.kind.map_or(true, |k| k == record.alert.kind)
            && (!self.unresolved_only || !record.is_resolved())
    }
}

/// Start of a rolling window of `days` ending at `now`, clamped to the
/// earliest representable instant.
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(chrono::Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Execution history plus alert history.
///
/// Implementations must be safe to call from several coordinators at once.
/// Windowed queries select records whose `start_time` is at or after `since`.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Append a record, or complete a previously recorded running one.
    ///
    /// Completed records are immutable: recording the same job again once it
    /// has a completion time fails with [`StoreError::AlreadyComplete`].
    async fn record_execution(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Records started at or after `since`, most recent first.
    async fn get_executions(
        &self,
        workload: &WorkloadId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Records without a completion time, oldest first.
    async fn get_running(&self, workload: &WorkloadId) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Completion time of the latest successful run.
    async fn get_last_success(
        &self,
        workload: &WorkloadId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn get_metrics(
        &self,
        workload: &WorkloadId,
        since: DateTime<Utc>,
    ) -> Result<Metrics, StoreError>;

    /// Nearest-rank percentile of successful run durations. `None` without data.
    async fn get_duration_percentile(
        &self,
        workload: &WorkloadId,
        percentile: f64,
        since: DateTime<Utc>,
    ) -> Result<Option<Duration>, StoreError>;

    /// Success rate in percent over completed runs. `None` without data.
    async fn get_success_rate(
        &self,
        workload: &WorkloadId,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError>;

    async fn store_alert(&self, record: AlertRecord) -> Result<(), StoreError>;

    /// Mark unresolved alerts of `kind` for the workload as resolved.
    /// Returns whether anything changed.
    async fn resolve_alert(
        &self,
        kind: AlertKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool, StoreError>;

    /// Matching alert records, most recent first.
    async fn list_alert_history(&self, query: &AlertQuery) -> Result<Vec<AlertRecord>, StoreError>;

    /// Drop completed executions started before `older_than` and resolved
    /// alerts dispatched before it. Returns how many entries were removed.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;
}
