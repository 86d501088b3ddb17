//! Shared domain types for the scheduled-workload guardian.
//!
//! - [`workload`]: tracked workloads and per-workload monitor config
//! - [`execution`]: execution records
//! - [`alert`]: alerts, kinds, severities, dedup keys
//! - [`stats`]: nearest-rank percentiles and run metrics
//! - [`config`]: process-level configuration from the environment

pub mod alert;
pub mod config;
pub mod duration;
pub mod error;
pub mod execution;
pub mod stats;
pub mod workload;

pub use alert::{dedup_key, workload_key_prefix, Alert, AlertKind, Severity};
pub use config::Config;
pub use error::CoreError;
pub use execution::ExecutionRecord;
pub use stats::Metrics;
pub use workload::{
    AlertingConfig, DeadManConfig, DestinationRef, MaintenanceWindow, MonitorConfig, SlaConfig,
    TrackedWorkload, WorkloadId,
};
