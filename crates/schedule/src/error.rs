//! Errors raised while evaluating schedules.

/// Errors from schedule parsing and evaluation.
///
/// All of these are configuration errors: callers fail closed for the one
/// workload or window involved and keep going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("schedule '{0}' has no upcoming occurrences")]
    NoOccurrences(String),

    #[error("{0} is outside the supported date range")]
    OutOfRange(String),
}
