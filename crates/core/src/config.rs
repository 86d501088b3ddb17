use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{format_duration, parse_duration};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Durations accept the compact `1h30m` notation; unparseable values fall back
/// to the default with a warning.
fn profiled_env_duration(profile: &str, key: &str, default: Duration) -> Duration {
    match profiled_env_opt(profile, key) {
        Some(raw) => parse_duration(&raw).unwrap_or_else(|| {
            tracing::warn!(key, value = %raw, "invalid duration, using default");
            default
        }),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitDefaults,
    pub leader_election: LeaderElectionConfig,
    pub files: FilesConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `GUARDIAN_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("GUARDIAN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            scheduler: SchedulerConfig::from_env_profiled(p),
            rate_limit: RateLimitDefaults::from_env_profiled(p),
            leader_election: LeaderElectionConfig::from_env_profiled(p),
            files: FilesConfig::from_env_profiled(p),
            history: HistoryConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   dead_man={}, sla={}, stuck={}, grace={}",
            format_duration(self.scheduler.dead_man_interval),
            format_duration(self.scheduler.sla_interval),
            format_duration(self.scheduler.stuck_interval),
            format_duration(self.scheduler.startup_grace_period),
        );
        tracing::info!(
            "  rate_limit:  burst={}, per_hour={}",
            self.rate_limit.burst,
            self.rate_limit.max_per_hour
        );
        tracing::info!("  leader:      enabled={}", self.leader_election.enabled);
        tracing::info!(
            "  files:       workloads={}, destinations={}",
            self.files.workloads.display(),
            self.files.destinations.display()
        );
        tracing::info!("  history:     retention_days={}", self.history.retention_days);
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub dead_man_interval: Duration,
    pub sla_interval: Duration,
    pub stuck_interval: Duration,
    /// No evaluation happens until this long after startup.
    pub startup_grace_period: Duration,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            dead_man_interval: profiled_env_duration(p, "DEADMAN_INTERVAL", Duration::from_secs(60)),
            sla_interval: profiled_env_duration(p, "SLA_INTERVAL", Duration::from_secs(300)),
            stuck_interval: profiled_env_duration(p, "STUCK_INTERVAL", Duration::from_secs(60)),
            startup_grace_period: profiled_env_duration(
                p,
                "STARTUP_GRACE_PERIOD",
                Duration::from_secs(120),
            ),
        }
    }
}

// ── Rate limiting ─────────────────────────────────────────────

/// Token-bucket limits applied to destinations without their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    pub burst: u32,
    pub max_per_hour: u32,
}

impl RateLimitDefaults {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            burst: profiled_env_u32(p, "DEFAULT_RATE_LIMIT_BURST", 10),
            max_per_hour: profiled_env_u32(p, "DEFAULT_RATE_LIMIT_PER_HOUR", 100),
        }
    }
}

// ── Leader election ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderElectionConfig {
    /// When false the SLA coordinator starts immediately.
    pub enabled: bool,
}

impl LeaderElectionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            enabled: profiled_env_bool(p, "LEADER_ELECTION", false),
        }
    }
}

// ── Input files ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub workloads: PathBuf,
    pub destinations: PathBuf,
}

impl FilesConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            workloads: PathBuf::from(profiled_env_or(p, "WORKLOADS_FILE", "config/workloads.yaml")),
            destinations: PathBuf::from(profiled_env_or(
                p,
                "DESTINATIONS_FILE",
                "config/destinations.yaml",
            )),
        }
    }
}

// ── Execution history ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Records older than this are pruned from the store.
    pub retention_days: u32,
}

impl HistoryConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            retention_days: profiled_env_u32(p, "HISTORY_RETENTION_DAYS", 30),
        }
    }
}
