//! Recurring-schedule evaluation.
//!
//! This crate provides:
//! - [`cron`]: one reusable cron utility (normalize, parse, next/previous
//!   occurrence, period inference) shared by every call site
//! - [`interval`]: expected run cadence and dead-man deadlines
//! - [`maintenance`]: maintenance-window containment checks

pub mod cron;
pub mod error;
pub mod interval;
pub mod maintenance;


pub use self::cron::{normalize_cron, parse_timezone, CronSchedule};
pub use self::error::ScheduleError;
pub use self::interval::{evaluate_dead_man, DeadManEvaluation, DeadManMode, IntervalModel};
pub use self::maintenance::{active_window, is_in_maintenance, window_contains};
