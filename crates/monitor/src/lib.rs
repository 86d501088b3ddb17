//! Periodic coordinators for the workload guardian.
//!
//! - [`provider`]: where tracked workloads come from
//! - [`runner`]: the shared periodic loop (grace period, cancellation, leader gate)
//! - [`suspension`]: suspended-since bookkeeping
//! - [`coordinators`]: dead-man, SLA recalculation and stuck-run detectors

pub mod coordinators;
pub mod error;
pub mod provider;
pub mod runner;
pub mod suspension;

pub use coordinators::{
    eligibility, DeadManChecker, Eligibility, MonitorContext, SlaRecalculator, StuckJobChecker,
    TickSummary,
};
pub use error::ProviderError;
pub use provider::{StaticProvider, WorkloadProvider};
pub use runner::{Check, Coordinator, PeriodicLoop};
pub use suspension::{Observation, SuspensionTracker};
