//! guardian-worker: runs the dead-man, SLA and stuck-run coordinators.
//!
//! Reads process config from the environment (`.env` honoured), workloads
//! and destinations from YAML, and runs until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use guardian_analyzer::SlaAnalyzer;
use guardian_core::config::{load_dotenv, Config};
use guardian_notify::{
    register_destinations, DestinationsFile, Dispatcher, DispatcherConfig, RateLimit,
    TemplateRenderer,
};
use guardian_storage::{window_start, ExecutionStore, InMemoryStore};
use guardian_monitor::{
    Check, Coordinator, DeadManChecker, MonitorContext, PeriodicLoop, SlaRecalculator,
    StaticProvider, StuckJobChecker, TickSummary, WorkloadProvider,
};

const PRUNE_INTERVAL: Duration = Duration::from_secs(3_600);
const LEADER_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ── CLI ─────────────────────────────────────────────────────────────

/// Scheduled-workload guardian worker.
#[derive(Parser, Debug)]
#[command(name = "guardian-worker", version, about)]
struct Cli {
    /// Config profile (overrides GUARDIAN_PROFILE).
    #[arg(long)]
    profile: Option<String>,

    /// Workloads YAML (overrides WORKLOADS_FILE).
    #[arg(long)]
    workloads: Option<PathBuf>,

    /// Destinations YAML (overrides DESTINATIONS_FILE).
    #[arg(long)]
    destinations: Option<PathBuf>,

    /// Leadership is held while this file exists. Required when leader
    /// election is enabled.
    #[arg(long, env = "LEADER_FILE")]
    leader_file: Option<PathBuf>,

    /// Send a test alert through every destination and exit.
    #[arg(long)]
    test_destinations: bool,
}

// ── History pruning ─────────────────────────────────────────────────

struct HistoryPruner {
    store: Arc<dyn ExecutionStore>,
    retention_days: u32,
}

#[async_trait]
impl Check for HistoryPruner {
    fn name(&self) -> &str {
        "history-prune"
    }

    async fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        match self.store.prune(window_start(now, self.retention_days)).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "pruned execution and alert history"),
            Err(e) => {
                warn!(error = %e, "history prune failed");
                summary.errors += 1;
            }
        }
        summary
    }
}

/// Flip the gate to `true` once `path` exists, then hold it until shutdown.
fn leader_gate(path: PathBuf, cancel: CancellationToken) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LEADER_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        info!(path = %path.display(), "leader file present");
                        let _ = tx.send(true);
                        break;
                    }
                }
            }
        }
        cancel.cancelled().await;
    });
    rx
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match cli.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    if let Some(path) = cli.workloads {
        config.files.workloads = path;
    }
    if let Some(path) = cli.destinations {
        config.files.destinations = path;
    }
    config.log_summary();

    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Dispatcher::new(DispatcherConfig {
        default_rate_limit: Some(RateLimit::from(&config.rate_limit)),
    })
    .with_store(store.clone());

    let destinations = DestinationsFile::load(&config.files.destinations).with_context(|| {
        format!("loading destinations from {}", config.files.destinations.display())
    })?;
    let renderer = Arc::new(TemplateRenderer::new());
    let registered = register_destinations(&dispatcher, &destinations, &renderer);
    info!(
        registered = registered.len(),
        configured = destinations.destinations.len(),
        "destinations ready"
    );

    if cli.test_destinations {
        let mut failed = 0;
        for name in dispatcher.channel_names() {
            match dispatcher.test_channel(&name).await {
                Ok(()) => info!(destination = %name, "test alert delivered"),
                Err(e) => {
                    warn!(destination = %name, error = %e, "test alert failed");
                    failed += 1;
                }
            }
        }
        anyhow::ensure!(failed == 0, "{failed} destination(s) failed the test");
        return Ok(());
    }

    let provider = Arc::new(
        StaticProvider::load(&config.files.workloads).with_context(|| {
            format!("loading workloads from {}", config.files.workloads.display())
        })?,
    );
    info!(workloads = provider.len(), "workloads loaded");

    let ctx = MonitorContext::new(
        provider as Arc<dyn WorkloadProvider>,
        Arc::new(SlaAnalyzer::new(store.clone())),
        dispatcher.clone(),
    );

    let shutdown = CancellationToken::new();
    let sched = &config.scheduler;

    let dead_man = Coordinator::new(
        PeriodicLoop::new("dead-man", sched.dead_man_interval)
            .startup_grace(sched.startup_grace_period),
        Arc::new(DeadManChecker::new(ctx.clone())),
        &shutdown,
    );

    let mut sla = Coordinator::new(
        PeriodicLoop::new("sla-recalc", sched.sla_interval)
            .startup_grace(sched.startup_grace_period),
        Arc::new(SlaRecalculator::new(ctx.clone())),
        &shutdown,
    );
    if config.leader_election.enabled {
        let path = cli
            .leader_file
            .context("leader election is enabled but no --leader-file / LEADER_FILE was given")?;
        sla = sla.with_leader_gate(leader_gate(path, shutdown.clone()));
    }

    let stuck = Coordinator::new(
        PeriodicLoop::new("stuck", sched.stuck_interval).startup_grace(sched.startup_grace_period),
        Arc::new(StuckJobChecker::new(ctx)),
        &shutdown,
    );

    let pruner = Coordinator::new(
        PeriodicLoop::new("history-prune", PRUNE_INTERVAL),
        Arc::new(HistoryPruner {
            store,
            retention_days: config.history.retention_days,
        }),
        &shutdown,
    );

    let coordinators = [dead_man, sla, stuck, pruner];
    for c in &coordinators {
        c.start();
    }
    info!("guardian-worker running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    for c in &coordinators {
        c.stop().await;
    }
    let dropped = dispatcher.shutdown();
    shutdown.cancel();
    info!(dropped_pending = dropped, "guardian-worker exited cleanly");

    Ok(())
}
