//! Routes alerts to destinations with deduplication, delays and rate limits.
//!
//! Each dedup key moves through a small state machine:
//!
//! ```text
//! Absent --dispatch(delay)--> Pending --timer--> Active --clear--> Absent
//!    |                           |                 ^
//!    +------dispatch-------------|-----------------+
//!                                +--cancel--> Absent
//! ```
//!
//! A re-dispatch while `Active` and inside the suppression window is a
//! no-op. All state sits behind one mutex that is released before any
//! destination is contacted, so a slow channel never blocks detection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use guardian_core::duration::MAX_CONFIG_DURATION;
use guardian_core::{workload_key_prefix, Alert, AlertingConfig, WorkloadId};
use guardian_storage::{AlertRecord, ExecutionStore};

use crate::health::ChannelHealth;
use crate::rate_limit::{RateLimit, TokenBucket};
use crate::traits::{DeliveryResult, Notifier, NotifyError};


/// Rejected dispatch calls. Delivery failures are not errors; they show up
/// in [`DeliveryResult`] and channel health.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("alert has an empty dedup key")]
    EmptyKey,

    #[error("dispatcher is shut down")]
    ShutDown,
}

/// What a [`Dispatcher::dispatch`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Sent recently; inside the suppression window.
    Suppressed,
    /// Delay timer armed.
    Pending,
    /// A delay timer for this key is already armed.
    AlreadyPending,
    /// Sent now, one result per matching destination in routing order.
    Sent(Vec<DeliveryResult>),
}

impl DispatchOutcome {
    /// Number of destinations that accepted the alert.
    pub fn delivered(&self) -> usize {
        match self {
            DispatchOutcome::Sent(results) => results.iter().filter(|r| r.success).count(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Applied to channels registered without a limit of their own.
    pub default_rate_limit: Option<RateLimit>,
}

enum Entry {
    Pending {
        generation: u64,
        cancel: CancellationToken,
    },
    Active {
        generation: u64,
        sent_at: Instant,
    },
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    limiters: HashMap<String, TokenBucket>,
    health: HashMap<String, ChannelHealth>,
    next_generation: u64,
}

impl State {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_pending(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(Entry::Pending { .. }))
    }

    fn within_suppression(&self, key: &str, window: Duration, now: Instant) -> bool {
        match self.entries.get(key) {
            Some(Entry::Active { sent_at, .. }) => {
                !window.is_zero() && now.saturating_duration_since(*sent_at) < window
            }
            _ => false,
        }
    }

    fn is_generation(&self, key: &str, generation: u64) -> bool {
        match self.entries.get(key) {
            Some(Entry::Pending { generation: g, .. }) | Some(Entry::Active { generation: g, .. }) => {
                *g == generation
            }
            None => false,
        }
    }

    /// Remove an entry, cancelling its timer if it was pending.
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        if let Entry::Pending { cancel, .. } = &entry {
            cancel.cancel();
        }
        Some(entry)
    }

    fn keys_with_prefix(&self, prefix: &str, pending_only: bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && (!pending_only || matches!(e, Entry::Pending { .. })))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

struct Inner {
    channels: RwLock<HashMap<String, Arc<dyn Notifier>>>,
    state: Mutex<State>,
    store: RwLock<Option<Arc<dyn ExecutionStore>>>,
    shutdown: CancellationToken,
    config: DispatcherConfig,
}

/// Shared alert dispatcher. Cloning is cheap and every clone sees the same
/// suppression, rate-limit and health state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

enum Plan {
    Done(DeliveryResult),
    Send(String, Arc<dyn Notifier>),
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
                state: Mutex::new(State::default()),
                store: RwLock::new(None),
                shutdown: CancellationToken::new(),
                config,
            }),
        }
    }

    /// Create a dispatcher with no channels and no default rate limit.
    pub fn empty() -> Self {
        Self::new(DispatcherConfig::default())
    }

    /// Persist every delivered alert to `store` as alert history.
    pub fn with_store(self, store: Arc<dyn ExecutionStore>) -> Self {
        *self.inner.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) a named destination.
    ///
    /// `rate_limit` falls back to the configured default; with neither the
    /// destination is unlimited.
    pub fn register_channel(
        &self,
        name: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        rate_limit: Option<RateLimit>,
    ) {
        let name = name.into();
        let limit = rate_limit.or(self.inner.config.default_rate_limit);

        {
            let mut state = self.state();
            match limit {
                Some(limit) => {
                    state.limiters.insert(name.clone(), TokenBucket::new(limit));
                }
                None => {
                    state.limiters.remove(&name);
                }
            }
            state.health.entry(name.clone()).or_default();
        }

        info!(destination = %name, channel = notifier.channel_name(), ?limit, "destination registered");
        self.inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, notifier);
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.inner.channels).keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch an alert according to `routing`.
    ///
    /// Per-kind severity overrides are applied first. Rejects alerts with an
    /// empty dedup key and any call after [`Dispatcher::shutdown`].
    pub async fn dispatch(
        &self,
        mut alert: Alert,
        routing: &AlertingConfig,
    ) -> Result<DispatchOutcome, DispatchError> {
        if alert.key.trim().is_empty() {
            return Err(DispatchError::EmptyKey);
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(DispatchError::ShutDown);
        }
        if let Some(severity) = routing.severity_overrides.get(&alert.kind) {
            alert.severity = *severity;
        }

        let now = Instant::now();
        let generation = {
            let mut state = self.state();
            if state.is_pending(&alert.key) {
                debug!(key = %alert.key, "alert already pending");
                return Ok(DispatchOutcome::AlreadyPending);
            }
            if state.within_suppression(&alert.key, routing.suppress_duplicates_for, now) {
                debug!(key = %alert.key, "alert suppressed as duplicate");
                return Ok(DispatchOutcome::Suppressed);
            }

            let generation = state.next_generation();
            if let Some(delay) = routing.alert_delay.filter(|d| !d.is_zero()) {
                let delay = delay.min(MAX_CONFIG_DURATION);
                let cancel = self.inner.shutdown.child_token();
                state.entries.insert(
                    alert.key.clone(),
                    Entry::Pending {
                        generation,
                        cancel: cancel.clone(),
                    },
                );
                debug!(key = %alert.key, delay_secs = delay.as_secs(), "alert delayed");
                self.spawn_delayed(alert, routing.clone(), now + delay, generation, cancel);
                return Ok(DispatchOutcome::Pending);
            }

            // Claim the key before sending so concurrent callers see it as active.
            state.entries.insert(
                alert.key.clone(),
                Entry::Active {
                    generation,
                    sent_at: now,
                },
            );
            generation
        };

        Ok(DispatchOutcome::Sent(
            self.deliver(alert, routing, generation).await,
        ))
    }

    fn spawn_delayed(
        &self,
        alert: Alert,
        routing: AlertingConfig,
        deadline: Instant,
        generation: u64,
        cancel: CancellationToken,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %alert.key, "pending alert dropped");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }

            if !this.promote(&alert.key, generation) {
                return;
            }
            this.deliver(alert, &routing, generation).await;
        });
    }

    /// Pending → Active, unless the entry was cancelled or replaced meanwhile.
    fn promote(&self, key: &str, generation: u64) -> bool {
        let mut state = self.state();
        if !state.is_pending(key) || !state.is_generation(key, generation) {
            return false;
        }
        state.entries.insert(
            key.to_string(),
            Entry::Active {
                generation,
                sent_at: Instant::now(),
            },
        );
        true
    }

    async fn deliver(
        &self,
        alert: Alert,
        routing: &AlertingConfig,
        generation: u64,
    ) -> Vec<DeliveryResult> {
        let plans: Vec<Plan> = {
            let channels = read(&self.inner.channels);
            let mut state = self.state();
            routing
                .destinations
                .iter()
                .filter(|d| d.accepts(alert.severity))
                .map(|dest| {
                    let name = dest.name.clone();
                    let Some(notifier) = channels.get(&name) else {
                        warn!(key = %alert.key, destination = %name, "destination not registered");
                        state
                            .health
                            .entry(name.clone())
                            .or_default()
                            .record_failure(Utc::now(), "destination not registered");
                        return Plan::Done(DeliveryResult {
                            destination: name,
                            success: false,
                            rate_limited: false,
                            error: Some("destination not registered".to_string()),
                            duration_ms: 0,
                        });
                    };

                    let admitted = state
                        .limiters
                        .get_mut(&name)
                        .map_or(true, TokenBucket::try_acquire);
                    if !admitted {
                        debug!(key = %alert.key, destination = %name, "rate limited");
                        state.health.entry(name.clone()).or_default().record_rate_limited();
                        return Plan::Done(DeliveryResult {
                            destination: name,
                            success: false,
                            rate_limited: true,
                            error: None,
                            duration_ms: 0,
                        });
                    }
                    Plan::Send(name, Arc::clone(notifier))
                })
                .collect()
        };

        let matched = plans.len();
        let alert_ref = &alert;
        let results: Vec<(DeliveryResult, bool)> = join_all(plans.into_iter().map(|plan| async move {
            match plan {
                Plan::Done(result) => (result, false),
                Plan::Send(destination, notifier) => {
                    let start = Instant::now();
                    let outcome = notifier.send(alert_ref).await;
                    let duration_ms = start.elapsed().as_millis() as u64;
                    let result = match outcome {
                        Ok(()) => {
                            info!(
                                key = %alert_ref.key,
                                destination = %destination,
                                channel = notifier.channel_name(),
                                duration_ms,
                                "alert delivered"
                            );
                            DeliveryResult {
                                destination,
                                success: true,
                                rate_limited: false,
                                error: None,
                                duration_ms,
                            }
                        }
                        Err(e) => {
                            warn!(
                                key = %alert_ref.key,
                                destination = %destination,
                                channel = notifier.channel_name(),
                                error = %e,
                                duration_ms,
                                "alert delivery failed"
                            );
                            DeliveryResult {
                                destination,
                                success: false,
                                rate_limited: false,
                                error: Some(e.to_string()),
                                duration_ms,
                            }
                        }
                    };
                    (result, true)
                }
            }
        }))
        .await;

        let delivered = results.iter().any(|(r, _)| r.success);
        {
            let mut state = self.state();
            let at = Utc::now();
            for (result, attempted) in &results {
                if !attempted {
                    continue;
                }
                let health = state.health.entry(result.destination.clone()).or_default();
                match &result.error {
                    None => health.record_success(at),
                    Some(e) => health.record_failure(at, e.clone()),
                }
            }
            // Nothing got through: release the key so the next tick retries.
            if matched > 0 && !delivered && state.is_generation(&alert.key, generation) {
                state.entries.remove(&alert.key);
            }
        }

        if delivered {
            self.record_history(alert).await;
        }
        results.into_iter().map(|(r, _)| r).collect()
    }

    async fn record_history(&self, alert: Alert) {
        let store = read(&self.inner.store).clone();
        if let Some(store) = store {
            let key = alert.key.clone();
            if let Err(e) = store.store_alert(AlertRecord::new(alert, Utc::now())).await {
                warn!(key = %key, error = %e, "failed to store alert history");
            }
        }
    }

    /// Cancel an armed delay timer. Returns whether one was cancelled; an
    /// alert that already went out is unaffected.
    pub fn cancel_pending_alert(&self, key: &str) -> bool {
        let mut state = self.state();
        if !state.is_pending(key) {
            return false;
        }
        state.remove(key);
        debug!(key, "pending alert cancelled");
        true
    }

    /// Cancel every armed delay timer for a workload.
    pub fn cancel_pending_alerts_for_workload(&self, workload: &WorkloadId) -> usize {
        let prefix = workload_key_prefix(workload);
        let mut state = self.state();
        let keys = state.keys_with_prefix(&prefix, true);
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    /// Forget a key so its next occurrence is treated as new. A pending
    /// timer for the key is cancelled too.
    pub fn clear_alert(&self, key: &str) -> bool {
        let cleared = self.state().remove(key).is_some();
        if cleared {
            debug!(key, "alert cleared");
        }
        cleared
    }

    pub fn clear_alerts_for_workload(&self, workload: &WorkloadId) -> usize {
        let prefix = workload_key_prefix(workload);
        let mut state = self.state();
        let keys = state.keys_with_prefix(&prefix, false);
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    /// Whether dispatching `alert` now would be a no-op (pending, or sent
    /// within the suppression window).
    pub fn is_suppressed(&self, alert: &Alert, routing: &AlertingConfig) -> bool {
        let state = self.state();
        state.is_pending(&alert.key)
            || state.within_suppression(&alert.key, routing.suppress_duplicates_for, Instant::now())
    }

    /// Drop every pending alert and refuse further dispatches. Pending
    /// alerts are never force-sent. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let mut state = self.state();
        let keys = state.keys_with_prefix("", true);
        for key in &keys {
            state.remove(key);
        }
        info!(dropped = keys.len(), "dispatcher shut down");
        keys.len()
    }

    pub fn channel_health(&self, name: &str) -> Option<ChannelHealth> {
        self.state().health.get(name).cloned()
    }

    pub fn all_channel_health(&self) -> BTreeMap<String, ChannelHealth> {
        self.state()
            .health
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state()
            .entries
            .values()
            .filter(|e| matches!(e, Entry::Pending { .. }))
            .count()
    }

    /// Keys that were sent and not yet cleared, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Active { .. }))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Send a test alert through one registered destination.
    pub async fn test_channel(&self, name: &str) -> Result<(), NotifyError> {
        let notifier = read(&self.inner.channels)
            .get(name)
            .cloned()
            .ok_or_else(|| NotifyError::Config(format!("No destination named '{name}'")))?;
        notifier.test().await
    }
}
