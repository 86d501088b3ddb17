//! Periodic loop shared by all coordinators.
//!
//! Each loop waits out its startup grace period, optionally waits for
//! leadership, then ticks on a fixed interval until cancelled.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinators::TickSummary;

/// How long [`Coordinator::stop`] waits for the loop before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// One evaluation pass over the fleet.
#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &str;

    async fn tick(&self, now: DateTime<Utc>) -> TickSummary;
}

#[derive(Debug, Clone)]
pub struct PeriodicLoop {
    name: String,
    interval: Duration,
    startup_grace: Duration,
}

impl PeriodicLoop {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            startup_grace: Duration::ZERO,
        }
    }

    /// No tick runs until this long after the loop starts.
    pub fn startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until `cancel` fires.
    ///
    /// With a `leader` receiver the loop blocks until it reads `true`. If the
    /// sender goes away first the loop exits without ticking.
    pub async fn run(
        &self,
        check: Arc<dyn Check>,
        cancel: CancellationToken,
        leader: Option<watch::Receiver<bool>>,
    ) {
        info!(
            coordinator = %self.name,
            interval = ?self.interval,
            grace = ?self.startup_grace,
            "coordinator starting"
        );

        if !self.startup_grace.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(coordinator = %self.name, "cancelled during startup grace");
                    return;
                }
                _ = tokio::time::sleep(self.startup_grace) => {}
            }
        }

        if let Some(mut rx) = leader {
            info!(coordinator = %self.name, "waiting for leadership");
            let became_leader = async { rx.wait_for(|leader| *leader).await.map(|_| ()) };
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(coordinator = %self.name, "cancelled while waiting for leadership");
                    return;
                }
                res = became_leader => {
                    if res.is_err() {
                        warn!(coordinator = %self.name, "leader signal closed before leadership was acquired");
                        return;
                    }
                    info!(coordinator = %self.name, "leadership acquired");
                }
            }
        }

        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = check.tick(Utc::now()).await;
                    debug!(
                        coordinator = %self.name,
                        evaluated = summary.evaluated,
                        skipped = summary.skipped,
                        alerted = summary.alerted,
                        resolved = summary.resolved,
                        errors = summary.errors,
                        "tick complete"
                    );
                }
            }
        }

        info!(coordinator = %self.name, "coordinator stopped");
    }
}

/// Owns one spawned [`PeriodicLoop`].
///
/// `stop` is idempotent and may be called before `start`, after which
/// `start` does nothing.
pub struct Coordinator {
    looper: PeriodicLoop,
    check: Arc<dyn Check>,
    leader: Option<watch::Receiver<bool>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// The loop is cancelled when `parent` is.
    pub fn new(looper: PeriodicLoop, check: Arc<dyn Check>, parent: &CancellationToken) -> Self {
        Self {
            looper,
            check,
            leader: None,
            cancel: parent.child_token(),
            handle: Mutex::new(None),
        }
    }

    pub fn with_leader_gate(mut self, leader: watch::Receiver<bool>) -> Self {
        self.leader = Some(leader);
        self
    }

    pub fn name(&self) -> &str {
        self.looper.name()
    }

    /// Spawn the loop. Returns false if already started or stopped.
    pub fn start(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return false;
        }

        let looper = self.looper.clone();
        let check = Arc::clone(&self.check);
        let cancel = self.cancel.clone();
        let leader = self.leader.clone();
        *handle = Some(tokio::spawn(async move {
            looper.run(check, cancel, leader).await;
        }));
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(coordinator = %self.name(), error = %e, "coordinator task failed"),
            Err(_) => {
                warn!(coordinator = %self.name(), "coordinator did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCheck {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl Check for CountingCheck {
        fn name(&self) -> &str {
            "counting"
        }

        async fn tick(&self, _now: DateTime<Utc>) -> TickSummary {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            TickSummary::default()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn coordinator(check: &Arc<CountingCheck>, grace: Duration, root: &CancellationToken) -> Coordinator {
        let looper = PeriodicLoop::new("test", Duration::from_secs(60)).startup_grace(grace);
        Coordinator::new(looper, Arc::clone(check) as Arc<dyn Check>, root)
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_during_grace() {
        let check = Arc::new(CountingCheck::default());
        let root = CancellationToken::new();
        let c = coordinator(&check, Duration::from_secs(120), &root);
        assert!(c.start());
        assert!(!c.start());

        settle().await;
        tokio::time::advance(Duration::from_secs(119)).await;
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 2);

        c.stop().await;
        assert!(!c.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_safe_before_start() {
        let check = Arc::new(CountingCheck::default());
        let root = CancellationToken::new();
        let c = coordinator(&check, Duration::ZERO, &root);

        c.stop().await;
        c.stop().await;
        assert!(!c.start());
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancel_stops_loop() {
        let check = Arc::new(CountingCheck::default());
        let root = CancellationToken::new();
        let c = coordinator(&check, Duration::ZERO, &root);
        c.start();
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 1);

        root.cancel();
        settle().await;
        assert!(!c.is_running());
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 1);
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn leader_gate_blocks_until_elected() {
        let check = Arc::new(CountingCheck::default());
        let root = CancellationToken::new();
        let (tx, rx) = watch::channel(false);
        let c = coordinator(&check, Duration::ZERO, &root).with_leader_gate(rx);
        c.start();

        tokio::time::advance(Duration::from_secs(300)).await;
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 0);

        tx.send(true).unwrap();
        settle().await;
        assert_eq!(check.ticks.load(Ordering::SeqCst), 1);
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_leader_signal_exits() {
        let check = Arc::new(CountingCheck::default());
        let root = CancellationToken::new();
        let (tx, rx) = watch::channel(false);
        let c = coordinator(&check, Duration::ZERO, &root).with_leader_gate(rx);
        c.start();
        settle().await;

        drop(tx);
        settle().await;
        assert!(!c.is_running());
        assert_eq!(check.ticks.load(Ordering::SeqCst), 0);
    }
}
