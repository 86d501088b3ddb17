//! In-memory [`ExecutionStore`] used by tests and the standalone worker.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use guardian_core::stats::{compute_metrics, percentile, sorted_durations, success_rate};
use guardian_core::{AlertKind, ExecutionRecord, Metrics, WorkloadId};

use crate::error::StoreError;
use crate::traits::{AlertQuery, AlertRecord, ExecutionStore};

#[derive(Default)]
pub struct InMemoryStore {
    executions: RwLock<HashMap<WorkloadId, Vec<ExecutionRecord>>>,
    alerts: RwLock<Vec<AlertRecord>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of execution records across all workloads.
    pub fn execution_count(&self) -> usize {
        read(&self.executions).values().map(Vec::len).sum()
    }

    fn window(&self, workload: &WorkloadId, since: DateTime<Utc>) -> Vec<ExecutionRecord> {
        read(&self.executions)
            .get(workload)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.start_time >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn record_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut executions = write(&self.executions);
        let records = executions.entry(record.workload.clone()).or_default();

        match records.iter_mut().find(|r| r.job_name == record.job_name) {
            Some(existing) if !existing.is_running() => Err(StoreError::AlreadyComplete {
                workload: record.workload.to_string(),
                job: record.job_name,
            }),
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => {
                debug!(workload = %record.workload, job = %record.job_name, "recorded execution");
                records.push(record);
                Ok(())
            }
        }
    }

    async fn get_executions(
        &self,
        workload: &WorkloadId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records = self.window(workload, since);
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }

    async fn get_running(&self, workload: &WorkloadId) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut running: Vec<ExecutionRecord> = read(&self.executions)
            .get(workload)
            .map(|records| records.iter().filter(|r| r.is_running()).cloned().collect())
            .unwrap_or_default();
        running.sort_by_key(|r| r.start_time);
        Ok(running)
    }

    async fn get_last_success(
        &self,
        workload: &WorkloadId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(read(&self.executions).get(workload).and_then(|records| {
            records
                .iter()
                .filter(|r| r.succeeded)
                .filter_map(|r| r.completion_time)
                .max()
        }))
    }

    async fn get_metrics(
        &self,
        workload: &WorkloadId,
        since: DateTime<Utc>,
    ) -> Result<Metrics, StoreError> {
        Ok(compute_metrics(&self.window(workload, since)))
    }

    async fn get_duration_percentile(
        &self,
        workload: &WorkloadId,
        p: f64,
        since: DateTime<Utc>,
    ) -> Result<Option<Duration>, StoreError> {
        let durations = sorted_durations(&self.window(workload, since), true);
        Ok(percentile(&durations, p))
    }

    async fn get_success_rate(
        &self,
        workload: &WorkloadId,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        Ok(success_rate(&self.window(workload, since)))
    }

    async fn store_alert(&self, record: AlertRecord) -> Result<(), StoreError> {
        write(&self.alerts).push(record);
        Ok(())
    }

    async fn resolve_alert(
        &self,
        kind: AlertKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut resolved = false;
        for record in write(&self.alerts).iter_mut() {
            let w = &record.alert.workload;
            if record.alert.kind == kind
                && w.namespace == namespace
                && w.name == name
                && record.resolved_at.is_none()
            {
                record.resolved_at = Some(now);
                resolved = true;
            }
        }
        Ok(resolved)
    }

    async fn list_alert_history(&self, query: &AlertQuery) -> Result<Vec<AlertRecord>, StoreError> {
        let mut matched: Vec<AlertRecord> = read(&self.alerts)
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.dispatched_at.cmp(&a.dispatched_at));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;

        {
            let mut executions = write(&self.executions);
            for records in executions.values_mut() {
                let before = records.len();
                records.retain(|r| r.is_running() || r.start_time >= older_than);
                removed += before - records.len();
            }
            executions.retain(|_, records| !records.is_empty());
        }

        let mut alerts = write(&self.alerts);
        let before = alerts.len();
        alerts.retain(|a| !a.is_resolved() || a.dispatched_at >= older_than);
        removed += before - alerts.len();

        debug!(removed, "pruned history");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_core::Alert;

    fn id() -> WorkloadId {
        WorkloadId::new("prod", "nightly-report")
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ago(hours: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(hours)
    }

    // -- executions --------------------------------------------------------

    #[tokio::test]
    async fn executions_are_most_recent_first() {
        let store = InMemoryStore::new();
        for (i, h) in [30, 10, 20].iter().enumerate() {
            store
                .record_execution(ExecutionRecord::succeeded(id(), format!("job-{i}"), ago(*h), secs(60)))
                .await
                .unwrap();
        }

        let records = store.get_executions(&id(), ago(48)).await.unwrap();
        let jobs: Vec<&str> = records.iter().map(|r| r.job_name.as_str()).collect();
        assert_eq!(jobs, vec!["job-1", "job-2", "job-0"]);

        let recent = store.get_executions(&id(), ago(15)).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn running_record_can_be_completed_once() {
        let store = InMemoryStore::new();
        let start = ago(1);
        let mut run = ExecutionRecord::running(id(), "job-1", start);
        store.record_execution(run.clone()).await.unwrap();
        assert_eq!(store.get_running(&id()).await.unwrap().len(), 1);

        run.complete(Utc::now(), true, Some(0), None).unwrap();
        store.record_execution(run.clone()).await.unwrap();
        assert!(store.get_running(&id()).await.unwrap().is_empty());
        assert_eq!(store.execution_count(), 1);

        let err = store.record_execution(run).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyComplete { .. }));
    }

    #[tokio::test]
    async fn last_success_ignores_failures() {
        let store = InMemoryStore::new();
        let ok = ExecutionRecord::succeeded(id(), "a", ago(5), secs(60));
        let expected = ok.completion_time;
        store.record_execution(ok).await.unwrap();
        store
            .record_execution(ExecutionRecord::failed(id(), "b", ago(1), secs(5), 1, "boom"))
            .await
            .unwrap();

        assert_eq!(store.get_last_success(&id()).await.unwrap(), expected);
        let other = WorkloadId::new("prod", "other");
        assert_eq!(store.get_last_success(&other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn windowed_statistics() {
        let store = InMemoryStore::new();
        for (i, d) in [10, 20, 30, 40].iter().enumerate() {
            store
                .record_execution(ExecutionRecord::succeeded(id(), format!("ok-{i}"), ago(2), secs(*d)))
                .await
                .unwrap();
        }
        store
            .record_execution(ExecutionRecord::failed(id(), "bad", ago(2), secs(1), 1, "oom"))
            .await
            .unwrap();
        // Outside the window.
        store
            .record_execution(ExecutionRecord::failed(id(), "old", ago(24 * 30), secs(1), 1, "x"))
            .await
            .unwrap();

        let since = ago(24);
        let rate = store.get_success_rate(&id(), since).await.unwrap().unwrap();
        assert!((rate - 80.0).abs() < 1e-9);

        let p50 = store.get_duration_percentile(&id(), 50.0, since).await.unwrap();
        assert_eq!(p50, Some(secs(20)));

        let m = store.get_metrics(&id(), since).await.unwrap();
        assert_eq!(m.total_runs, 5);
        assert_eq!(m.failed_runs, 1);
        assert_eq!(m.p95_duration, secs(40));
    }

    #[tokio::test]
    async fn percentile_is_none_without_history() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_duration_percentile(&id(), 95.0, ago(24)).await.unwrap(), None);
        assert_eq!(store.get_success_rate(&id(), ago(24)).await.unwrap(), None);
    }

    // -- alerts ------------------------------------------------------------

    #[tokio::test]
    async fn resolve_marks_only_matching_alerts() {
        let store = InMemoryStore::new();
        let dead = Alert::new(id(), AlertKind::DeadManTriggered, "dead", "no runs");
        let stuck = Alert::new(id(), AlertKind::JobStuck, "stuck", "running 3h");
        store.store_alert(AlertRecord::new(dead, ago(2))).await.unwrap();
        store.store_alert(AlertRecord::new(stuck, ago(1))).await.unwrap();

        assert!(store
            .resolve_alert(AlertKind::DeadManTriggered, "prod", "nightly-report")
            .await
            .unwrap());
        assert!(!store
            .resolve_alert(AlertKind::DeadManTriggered, "prod", "nightly-report")
            .await
            .unwrap());

        let open = store
            .list_alert_history(&AlertQuery {
                unresolved_only: true,
                ..AlertQuery::for_workload(id())
            })
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].alert.kind, AlertKind::JobStuck);
    }

    #[tokio::test]
    async fn alert_history_is_newest_first_and_limited() {
        let store = InMemoryStore::new();
        for h in [3, 1, 2] {
            let alert = Alert::new(id(), AlertKind::JobStuck, format!("{h}h"), "");
            store.store_alert(AlertRecord::new(alert, ago(h))).await.unwrap();
        }
        let query = AlertQuery {
            limit: Some(2),
            ..AlertQuery::default()
        };
        let titles: Vec<String> = store
            .list_alert_history(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.alert.title)
            .collect();
        assert_eq!(titles, vec!["1h", "2h"]);
    }

    // -- prune -------------------------------------------------------------

    #[tokio::test]
    async fn prune_keeps_running_and_unresolved() {
        let store = InMemoryStore::new();
        store
            .record_execution(ExecutionRecord::succeeded(id(), "old", ago(24 * 40), secs(5)))
            .await
            .unwrap();
        store
            .record_execution(ExecutionRecord::running(id(), "hung", ago(24 * 40)))
            .await
            .unwrap();
        store
            .record_execution(ExecutionRecord::succeeded(id(), "new", ago(1), secs(5)))
            .await
            .unwrap();

        let mut resolved = AlertRecord::new(Alert::new(id(), AlertKind::JobStuck, "t", "m"), ago(24 * 40));
        resolved.resolved_at = Some(ago(24 * 39));
        store.store_alert(resolved).await.unwrap();
        let open = AlertRecord::new(Alert::new(id(), AlertKind::DeadManTriggered, "t", "m"), ago(24 * 40));
        store.store_alert(open).await.unwrap();

        let removed = store.prune(ago(24 * 30)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.execution_count(), 2);
        assert_eq!(store.list_alert_history(&AlertQuery::default()).await.unwrap().len(), 1);
    }
}
