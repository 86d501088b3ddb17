use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use guardian_analyzer::SlaAnalyzer;
use guardian_core::{
    Alert, AlertKind, DestinationRef, ExecutionRecord, MaintenanceWindow, TrackedWorkload,
    WorkloadId,
};
use guardian_notify::{Dispatcher, Notifier, NotifyError};
use guardian_storage::{AlertQuery, ExecutionStore, InMemoryStore};

use super::*;
use crate::error::ProviderError;
use crate::provider::StaticProvider;

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn now() -> DateTime<Utc> {
    at("2026-03-02T12:00:00Z")
}

fn hours(h: i64) -> chrono::Duration {
    chrono::Duration::hours(h)
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Alert>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    fn kinds(&self) -> Vec<AlertKind> {
        self.sent.lock().unwrap().iter().map(|a| a.kind).collect()
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Config("down".into()));
        }
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

struct FailingProvider;

#[async_trait]
impl WorkloadProvider for FailingProvider {
    async fn list(&self) -> Result<Vec<TrackedWorkload>, ProviderError> {
        Err(ProviderError::Unavailable("cache not synced".into()))
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    provider: Arc<StaticProvider>,
    notifier: Arc<RecordingNotifier>,
    dispatcher: Dispatcher,
    ctx: MonitorContext,
}

impl Harness {
    fn new(workloads: Vec<TrackedWorkload>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(StaticProvider::new(workloads));
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Dispatcher::empty().with_store(store.clone() as Arc<dyn ExecutionStore>);
        dispatcher.register_channel("ops", notifier.clone() as Arc<dyn Notifier>, None);
        let ctx = MonitorContext::new(
            provider.clone() as Arc<dyn WorkloadProvider>,
            Arc::new(SlaAnalyzer::new(store.clone() as Arc<dyn ExecutionStore>)),
            dispatcher.clone(),
        );
        Self {
            store,
            provider,
            notifier,
            dispatcher,
            ctx,
        }
    }

    async fn record(&self, records: Vec<ExecutionRecord>) {
        for r in records {
            self.store.record_execution(r).await.unwrap();
        }
    }
}

fn id(name: &str) -> WorkloadId {
    WorkloadId::new("batch", name)
}

/// Daily at 02:00 UTC, routed to `ops`, last success 26h before `now()`.
fn overdue(name: &str) -> TrackedWorkload {
    let mut w = TrackedWorkload::new(id(name), "0 2 * * *");
    w.config.alerting.destinations = vec![DestinationRef::new("ops")];
    w.status.last_success_time = Some(now() - hours(26));
    w
}

fn healthy(name: &str) -> TrackedWorkload {
    let mut w = overdue(name);
    w.status.last_success_time = Some(now() - hours(2));
    w
}

// -- eligibility -------------------------------------------------------------

#[test]
fn eligibility_order() {
    let mut w = overdue("etl");
    assert_eq!(eligibility(&w, true, now()), Eligibility::Eligible);
    assert_eq!(eligibility(&w, false, now()), Eligibility::FeatureDisabled);

    w.suspended = true;
    assert_eq!(eligibility(&w, true, now()), Eligibility::Suspended);
    w.config.suspension.pause_monitoring = false;
    assert!(eligibility(&w, true, now()).is_eligible());

    w.config.maintenance_windows.push(MaintenanceWindow {
        name: "patching".into(),
        schedule: "0 11 * * *".into(),
        duration: Duration::from_secs(2 * 3_600),
        timezone: None,
        suppress_alerts: true,
    });
    assert_eq!(
        eligibility(&w, true, now()),
        Eligibility::InMaintenance {
            window: "patching".into()
        }
    );
    assert!(eligibility(&w, true, now() + hours(2)).is_eligible());
}

// -- dead-man ----------------------------------------------------------------

#[tokio::test]
async fn dead_man_alerts_once_per_suppression_window() {
    let h = Harness::new(vec![overdue("etl"), healthy("report")]);
    let checker = DeadManChecker::new(h.ctx.clone());

    let first = checker.tick(now()).await;
    assert_eq!(first.evaluated, 2);
    assert_eq!(first.alerted, 1);
    assert_eq!(h.notifier.kinds(), vec![AlertKind::DeadManTriggered]);

    let sent = h.notifier.sent.lock().unwrap()[0].clone();
    assert_eq!(sent.key, "batch/etl/DeadManTriggered");
    assert_eq!(sent.monitor, "dead-man");
    assert_eq!(sent.context["missed_count"], "1");

    let second = checker.tick(now()).await;
    assert_eq!(second.evaluated, 2);
    assert_eq!(second.alerted, 0);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn dead_man_resolves_after_a_success() {
    let h = Harness::new(vec![overdue("etl")]);
    let checker = DeadManChecker::new(h.ctx.clone());
    checker.tick(now()).await;
    assert_eq!(h.dispatcher.active_keys(), vec!["batch/etl/DeadManTriggered".to_string()]);

    h.record(vec![ExecutionRecord::succeeded(
        id("etl"),
        "etl-100",
        now() - hours(1),
        Duration::from_secs(60),
    )])
    .await;

    let summary = checker.tick(now()).await;
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.alerted, 0);
    assert!(h.dispatcher.active_keys().is_empty());

    let history = h
        .store
        .list_alert_history(&AlertQuery::for_workload(id("etl")))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_resolved());
}

#[tokio::test]
async fn skips_disabled_maintenance_and_already_active() {
    let mut disabled = overdue("disabled");
    disabled.config.dead_man.enabled = false;

    let mut in_window = overdue("patched");
    in_window.config.maintenance_windows.push(MaintenanceWindow {
        name: "patching".into(),
        schedule: "0 11 * * *".into(),
        duration: Duration::from_secs(2 * 3_600),
        timezone: None,
        suppress_alerts: true,
    });

    let mut known = overdue("known");
    known.status.active_alerts = vec![AlertKind::DeadManTriggered];

    let h = Harness::new(vec![disabled, in_window, known]);
    let summary = DeadManChecker::new(h.ctx.clone()).tick(now()).await;
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.alerted, 0);
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn bad_schedule_does_not_stop_the_fleet() {
    let mut broken = overdue("broken");
    broken.schedule = "every tuesday-ish".into();
    let mut never_ran = overdue("fresh");
    never_ran.status.last_success_time = None;

    let h = Harness::new(vec![broken, never_ran, overdue("etl")]);
    let summary = DeadManChecker::new(h.ctx.clone()).tick(now()).await;
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.alerted, 1);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn provider_failure_counts_as_error() {
    let h = Harness::new(Vec::new());
    let ctx = MonitorContext::new(
        Arc::new(FailingProvider),
        h.ctx.analyzer.clone(),
        h.dispatcher.clone(),
    );
    let summary = DeadManChecker::new(ctx).tick(now()).await;
    assert_eq!(summary, TickSummary { errors: 1, ..TickSummary::default() });
}

#[tokio::test]
async fn suspended_too_long_lifecycle() {
    let mut w = overdue("paused");
    w.suspended = true;
    w.config.suspension.alert_if_suspended_for = Some(Duration::from_secs(2 * 3_600));
    let h = Harness::new(vec![w]);
    let checker = DeadManChecker::new(h.ctx.clone());

    // First sighting only starts tracking; dead-man is paused.
    let first = checker.tick(now()).await;
    assert_eq!(first.skipped, 1);
    assert_eq!(first.alerted, 0);
    assert_eq!(checker.suspensions().suspended_since(&id("paused")), Some(now()));

    let later = checker.tick(now() + hours(3)).await;
    assert_eq!(later.alerted, 1);
    assert_eq!(h.notifier.kinds(), vec![AlertKind::SuspendedTooLong]);

    h.provider.update(&id("paused"), |w| {
        w.suspended = false;
        w.status.last_success_time = Some(now() + hours(3));
    });
    let resumed = checker.tick(now() + hours(4)).await;
    assert_eq!(resumed.resolved, 1);
    assert_eq!(resumed.evaluated, 1);
    assert!(checker.suspensions().is_empty());
    assert!(h.dispatcher.active_keys().is_empty());
}

#[tokio::test]
async fn suspended_without_pause_is_still_checked() {
    let mut w = overdue("etl");
    w.suspended = true;
    w.config.suspension.pause_monitoring = false;
    let h = Harness::new(vec![w]);

    let summary = DeadManChecker::new(h.ctx.clone()).tick(now()).await;
    assert_eq!(summary.evaluated, 1);
    assert_eq!(h.notifier.kinds(), vec![AlertKind::DeadManTriggered]);
}

#[tokio::test(start_paused = true)]
async fn delayed_alert_is_cancelled_when_condition_clears() {
    let mut w = overdue("etl");
    w.config.alerting.alert_delay = Some(Duration::from_secs(300));
    let h = Harness::new(vec![w]);
    let checker = DeadManChecker::new(h.ctx.clone());

    let scheduled = checker.tick(now()).await;
    assert_eq!(scheduled.alerted, 1);
    assert_eq!(h.dispatcher.pending_count(), 1);

    let repeat = checker.tick(now()).await;
    assert_eq!(repeat.alerted, 0);
    assert_eq!(h.dispatcher.pending_count(), 1);

    h.record(vec![ExecutionRecord::succeeded(
        id("etl"),
        "etl-101",
        now() - hours(1),
        Duration::from_secs(30),
    )])
    .await;
    let summary = checker.tick(now()).await;
    assert_eq!(summary.resolved, 1);
    assert_eq!(h.dispatcher.pending_count(), 0);

    tokio::time::advance(Duration::from_secs(600)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.notifier.count(), 0);
}

// -- SLA ---------------------------------------------------------------------

fn runs(name: &str, ok: usize, failed: usize, secs: u64) -> Vec<ExecutionRecord> {
    let mut records: Vec<ExecutionRecord> = (0..ok)
        .map(|i| {
            ExecutionRecord::succeeded(
                id(name),
                format!("ok-{i}"),
                now() - hours(2 + i as i64 * 6),
                Duration::from_secs(secs),
            )
        })
        .collect();
    records.extend((0..failed).map(|i| {
        ExecutionRecord::failed(
            id(name),
            format!("fail-{i}"),
            now() - hours(3 + i as i64 * 6),
            Duration::from_secs(5),
            1,
            "OOMKilled",
        )
    }));
    records
}

#[tokio::test]
async fn sla_violations_raise_one_alert_per_kind() {
    let mut w = healthy("etl");
    w.config.sla.max_duration = Some(Duration::from_secs(30));
    let h = Harness::new(vec![w]);
    h.record(runs("etl", 8, 2, 60)).await;

    let summary = SlaRecalculator::new(h.ctx.clone()).tick(now()).await;
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.alerted, 2);
    assert_eq!(
        h.notifier.kinds(),
        vec![AlertKind::SlaSuccessRate, AlertKind::SlaMaxDuration]
    );
    let rate = h.notifier.sent.lock().unwrap()[0].clone();
    assert_eq!(rate.context["actual"], "80.00");
    assert_eq!(rate.context["total_runs"], "10");
}

#[tokio::test]
async fn sla_resolves_when_target_relaxed() {
    let h = Harness::new(vec![healthy("etl")]);
    h.record(runs("etl", 8, 2, 60)).await;
    let recalc = SlaRecalculator::new(h.ctx.clone());

    recalc.tick(now()).await;
    assert_eq!(h.dispatcher.active_keys(), vec!["batch/etl/SLA/SuccessRate".to_string()]);

    h.provider.update(&id("etl"), |w| w.config.sla.min_success_rate = 75.0);
    let summary = recalc.tick(now()).await;
    assert_eq!(summary.resolved, 1);
    assert!(h.dispatcher.active_keys().is_empty());
}

#[tokio::test]
async fn sla_without_history_is_quiet() {
    let h = Harness::new(vec![healthy("etl")]);
    let summary = SlaRecalculator::new(h.ctx.clone()).tick(now()).await;
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.alerted, 0);
}

#[tokio::test]
async fn regression_detected_against_baseline() {
    let mut w = healthy("etl");
    w.config.sla.regression_threshold_percent = Some(20.0);
    let h = Harness::new(vec![w]);

    let mut history: Vec<ExecutionRecord> = (0..20)
        .map(|i| {
            ExecutionRecord::succeeded(
                id("etl"),
                format!("base-{i}"),
                now() - hours(48 + i * 12),
                Duration::from_secs(100),
            )
        })
        .collect();
    history.push(ExecutionRecord::succeeded(
        id("etl"),
        "today",
        now() - hours(1),
        Duration::from_secs(150),
    ));
    h.record(history).await;

    let summary = SlaRecalculator::new(h.ctx.clone()).tick(now()).await;
    assert_eq!(summary.alerted, 1);
    assert_eq!(h.notifier.kinds(), vec![AlertKind::DurationRegression]);
    let alert = h.notifier.sent.lock().unwrap()[0].clone();
    assert_eq!(alert.context["percent_change"], "50.0");
}

// -- stuck -------------------------------------------------------------------

#[tokio::test]
async fn stuck_run_alerts_then_resolves_on_completion() {
    let h = Harness::new(vec![healthy("etl")]);
    let started = now() - hours(3);
    h.record(vec![
        ExecutionRecord::running(id("etl"), "etl-7", started),
        ExecutionRecord::running(id("etl"), "etl-8", now() - chrono::Duration::minutes(5)),
    ])
    .await;
    let checker = StuckJobChecker::new(h.ctx.clone());

    let summary = checker.tick(now()).await;
    assert_eq!(summary.alerted, 1);
    let alert = h.notifier.sent.lock().unwrap()[0].clone();
    assert_eq!(alert.kind, AlertKind::JobStuck);
    assert_eq!(alert.context["job"], "etl-7");
    assert_eq!(alert.context["stuck_runs"], "1");

    h.record(vec![ExecutionRecord::succeeded(
        id("etl"),
        "etl-7",
        started,
        Duration::from_secs(3 * 3_600 + 60),
    )])
    .await;
    let summary = checker.tick(now() + chrono::Duration::minutes(2)).await;
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.alerted, 0);
}

#[tokio::test]
async fn stuck_uses_max_duration_as_threshold() {
    let mut w = healthy("etl");
    w.config.sla.max_duration = Some(Duration::from_secs(600));
    let h = Harness::new(vec![w]);
    h.record(vec![ExecutionRecord::running(
        id("etl"),
        "etl-9",
        now() - chrono::Duration::minutes(15),
    )])
    .await;

    let summary = StuckJobChecker::new(h.ctx.clone()).tick(now()).await;
    assert_eq!(summary.alerted, 1);
}

#[tokio::test]
async fn failed_delivery_is_retried_next_tick() {
    let h = Harness::new(vec![overdue("etl")]);
    h.notifier.fail.store(true, Ordering::SeqCst);
    let checker = DeadManChecker::new(h.ctx.clone());

    checker.tick(now()).await;
    assert!(h.dispatcher.active_keys().is_empty());
    assert_eq!(h.dispatcher.channel_health("ops").unwrap().consecutive_failures, 1);

    h.notifier.fail.store(false, Ordering::SeqCst);
    checker.tick(now()).await;
    assert_eq!(h.notifier.count(), 1);
    assert_eq!(h.dispatcher.channel_health("ops").unwrap().consecutive_failures, 0);
}
