//! Interval model: expected run cadence and dead-man deadlines.
//!
//! Two modes:
//! - **fixed**: alert when nothing succeeded for `max_time_since_last_success`
//! - **auto**: infer the interval from the schedule; every expected
//!   occurrence gets `buffer` of grace, and the switch trips once
//!   `missed_schedule_threshold` such extended deadlines have passed

use std::time::Duration;

use chrono::{DateTime, Utc};

use guardian_core::duration::{checked_after, format_duration};
use guardian_core::workload::DeadManConfig;

use crate::cron::{CronSchedule, PERIOD_SAMPLES};
use crate::error::ScheduleError;

/// Expected cadence of a recurring schedule.
#[derive(Debug, Clone)]
pub struct IntervalModel {
    schedule: CronSchedule,
}

impl IntervalModel {
    pub fn from_schedule(expr: &str, tz: Option<&str>) -> Result<Self, ScheduleError> {
        Ok(Self {
            schedule: CronSchedule::parse(expr, tz)?,
        })
    }

    /// Expected gap between consecutive runs around `reference`.
    pub fn expected_interval(&self, reference: DateTime<Utc>) -> Result<Duration, ScheduleError> {
        self.schedule.infer_period(reference, PERIOD_SAMPLES)
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }
}

/// Which mode produced a [`DeadManEvaluation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadManMode {
    Fixed,
    AutoInterval,
    /// Neither mode is enabled; never triggers.
    Disabled,
}

/// Outcome of a dead-man check for one workload.
#[derive(Debug, Clone)]
pub struct DeadManEvaluation {
    pub triggered: bool,
    pub mode: DeadManMode,
    /// Expected occurrences whose extended deadline has already passed.
    pub missed_count: u32,
    /// Instant after which the switch trips. `None` when disabled.
    pub deadline: Option<DateTime<Utc>>,
    pub expected_interval: Option<Duration>,
    pub elapsed: Duration,
    pub message: String,
}

fn deadline_after(
    last_success: DateTime<Utc>,
    span: Option<Duration>,
) -> Result<DateTime<Utc>, ScheduleError> {
    span.and_then(|d| checked_after(last_success, d)).ok_or_else(|| {
        ScheduleError::OutOfRange(format!(
            "dead-man deadline {} after {}",
            span.map_or_else(|| "overflowing span".to_string(), format_duration),
            last_success.to_rfc3339()
        ))
    })
}

/// Count expected occurrences `j >= 1` with `last + j*interval + buffer < now`.
fn missed_occurrences(elapsed: Duration, interval: Duration, buffer: Duration) -> u32 {
    let interval_ms = interval.as_millis();
    if interval_ms == 0 {
        return 0;
    }
    match elapsed.checked_sub(buffer) {
        Some(over) if !over.is_zero() => {
            let missed = (over.as_millis() - 1) / interval_ms;
            u32::try_from(missed).unwrap_or(u32::MAX)
        }
        _ => 0,
    }
}

/// Decide whether a workload's dead-man's switch has tripped.
///
/// `last_success` is the most recent successful completion (or the
/// workload's creation time before any success). The schedule is only
/// parsed in auto mode, so a fixed-mode workload with a broken schedule
/// still gets checked.
pub fn evaluate_dead_man(
    schedule: &str,
    tz: Option<&str>,
    last_success: DateTime<Utc>,
    now: DateTime<Utc>,
    cfg: &DeadManConfig,
) -> Result<DeadManEvaluation, ScheduleError> {
    let elapsed = (now - last_success).to_std().unwrap_or_default();

    if let Some(max) = cfg.max_time_since_last_success {
        let deadline = deadline_after(last_success, Some(max))?;
        let triggered = elapsed > max;
        let message = if triggered {
            format!(
                "No successful run for {} (limit {})",
                format_duration(elapsed),
                format_duration(max)
            )
        } else {
            format!(
                "Last success {} ago, within limit {}",
                format_duration(elapsed),
                format_duration(max)
            )
        };
        return Ok(DeadManEvaluation {
            triggered,
            mode: DeadManMode::Fixed,
            missed_count: triggered as u32,
            deadline: Some(deadline),
            expected_interval: None,
            elapsed,
            message,
        });
    }

    let auto = &cfg.auto_from_schedule;
    if !auto.enabled {
        return Ok(DeadManEvaluation {
            triggered: false,
            mode: DeadManMode::Disabled,
            missed_count: 0,
            deadline: None,
            expected_interval: None,
            elapsed,
            message: "Dead-man's switch has no threshold configured".to_string(),
        });
    }

    let model = IntervalModel::from_schedule(schedule, tz)?;
    let interval = model.expected_interval(last_success)?;
    let threshold = auto.missed_schedule_threshold.max(1);

    let missed_count = missed_occurrences(elapsed, interval, auto.buffer);
    let triggered = missed_count >= threshold;
    let span = interval
        .checked_mul(threshold)
        .and_then(|d| d.checked_add(auto.buffer));
    let deadline = deadline_after(last_success, span)?;

    let message = if triggered {
        format!(
            "No successful run for {}; expected every {} (+{} buffer), {} consecutive run(s) missed",
            format_duration(elapsed),
            format_duration(interval),
            format_duration(auto.buffer),
            missed_count
        )
    } else {
        format!(
            "Last success {} ago; next deadline {}",
            format_duration(elapsed),
            deadline.to_rfc3339()
        )
    };

    Ok(DeadManEvaluation {
        triggered,
        mode: DeadManMode::AutoInterval,
        missed_count,
        deadline: Some(deadline),
        expected_interval: Some(interval),
        elapsed,
        message,
    })
}
