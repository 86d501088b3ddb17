//! Maintenance-window evaluation.
//!
//! A window is open from each schedule occurrence until `duration` later.
//! Timezone precedence: the window's own, then the workload's, then UTC.

use chrono::{DateTime, Utc};
use tracing::warn;

use guardian_core::duration::{checked_after, format_duration};
use guardian_core::workload::MaintenanceWindow;

use crate::cron::{CronSchedule, PERIOD_SAMPLES};
use crate::error::ScheduleError;

/// Whether `now` falls inside the window's most recent occurrence.
///
/// Only the latest start at or before `now` is considered, found by walking
/// back at most one schedule period.
pub fn window_contains(
    window: &MaintenanceWindow,
    now: DateTime<Utc>,
    fallback_tz: Option<&str>,
) -> Result<bool, ScheduleError> {
    let tz = window.timezone.as_deref().or(fallback_tz);
    let schedule = CronSchedule::parse(&window.schedule, tz)?;
    let period = schedule.infer_period(now, PERIOD_SAMPLES)?;

    let Some(start) = schedule.previous_at_or_before(now, period) else {
        return Ok(false);
    };
    let end = checked_after(start, window.duration).ok_or_else(|| {
        ScheduleError::OutOfRange(format!(
            "window '{}' lasting {}",
            window.name,
            format_duration(window.duration)
        ))
    })?;
    Ok(start <= now && now < end)
}

/// The first suppressing window that contains `now`.
///
/// Windows that do not suppress alerts are ignored. A window with a bad
/// schedule or timezone is logged and skipped.
pub fn active_window<'a>(
    windows: &'a [MaintenanceWindow],
    now: DateTime<Utc>,
    fallback_tz: Option<&str>,
) -> Option<&'a MaintenanceWindow> {
    windows
        .iter()
        .filter(|w| w.suppress_alerts)
        .find(|w| match window_contains(w, now, fallback_tz) {
            Ok(inside) => inside,
            Err(e) => {
                warn!(window = %w.name, error = %e, "skipping maintenance window");
                false
            }
        })
}

/// Shorthand for `active_window(..).is_some()`.
pub fn is_in_maintenance(
    windows: &[MaintenanceWindow],
    now: DateTime<Utc>,
    fallback_tz: Option<&str>,
) -> bool {
    active_window(windows, now, fallback_tz).is_some()
}
