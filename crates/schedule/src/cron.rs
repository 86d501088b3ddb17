//! Cron normalization, parsing, and occurrence search.
//!
//! Workload schedules use the standard 5-field form
//! (`min hour day-of-month month day-of-week`, Sunday = 0 or 7). The `cron`
//! crate wants 6 fields with seconds first and numbers Sunday as 1, so
//! [`normalize_cron`] rewrites 5-field expressions before parsing.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ::cron::Schedule;

use crate::error::ScheduleError;

/// Occurrences sampled when inferring a schedule's period.
pub const PERIOD_SAMPLES: usize = 8;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// Numeric day-of-week values are shifted from standard cron numbering
/// (0-7, Sunday = 0 and 7) to the `cron` crate's (1-7, Sunday = 1).
/// 6/7-field expressions and `@daily`-style macros pass through unchanged.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.starts_with('@') {
        return trimmed.to_string();
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return trimmed.to_string();
    }

    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        translate_day_of_week(fields[4])
    )
}

/// Shift numeric day-of-week atoms by one. Names (`MON-FRI`), `*` and `?`
/// are left alone.
fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(translate_dow_part)
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_dow_part(part: &str) -> String {
    let (range, step) = match part.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (part, None),
    };
    let with_step = |r: String| match step {
        Some(s) => format!("{r}/{s}"),
        None => r,
    };

    match range.split_once('-') {
        Some((start, end)) => match (start.parse::<u8>(), end.parse::<u8>()) {
            // Stepped ranges are expanded so Sunday lands on 1 wherever the
            // step puts it.
            (Ok(s), Ok(e)) if s <= e && e <= 7 && step.is_some() => {
                match step.and_then(|st| st.parse::<usize>().ok()).filter(|st| *st > 0) {
                    Some(st) => expand_dow(s, e, st),
                    None => with_step(range.to_string()),
                }
            }
            (Ok(0), Ok(7)) => "1-7".to_string(),
            // `5-7` is Fri..Sun; Sunday wraps to 1 so it becomes `6-7,1`.
            (Ok(s), Ok(7)) if s > 0 => format!("{}-7,1", s + 1),
            (Ok(s), Ok(e)) if e < 7 => with_step(format!("{}-{}", s + 1, e + 1)),
            _ => with_step(range.to_string()),
        },
        None => match range.parse::<u8>() {
            Ok(d) => with_step(((d % 7) + 1).to_string()),
            Err(_) => with_step(range.to_string()),
        },
    }
}

/// Days `start..=end` every `step`, as an ascending list in cron crate numbering.
fn expand_dow(start: u8, end: u8, step: usize) -> String {
    let mut days: Vec<u8> = (start..=end).step_by(step).map(|d| (d % 7) + 1).collect();
    days.sort_unstable();
    days.dedup();
    days.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
}

/// Parse an IANA timezone name, defaulting to UTC when absent or blank.
pub fn parse_timezone(name: Option<&str>) -> Result<Tz, ScheduleError> {
    match name.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Tz::UTC),
        Some(name) => Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string())),
    }
}

/// A parsed cron schedule bound to the timezone it is evaluated in.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
    tz: Tz,
}

impl CronSchedule {
    /// Parse `expr` (5 or 6 fields) in timezone `tz` (UTC when `None`).
    pub fn parse(expr: &str, tz: Option<&str>) -> Result<Self, ScheduleError> {
        let normalized = normalize_cron(expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expr: expr.trim().to_string(),
            schedule,
            tz: parse_timezone(tz)?,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First occurrence strictly after `t`.
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.occurrences_after(t, 1).into_iter().next()
    }

    /// Up to `n` occurrences strictly after `t`, ascending.
    pub fn occurrences_after(&self, t: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let local = t.with_timezone(&self.tz);
        self.schedule
            .after(&local)
            .take(n)
            .map(|dt| dt.with_timezone(&Utc))
            .collect()
    }

    /// Expected gap between runs, sampled from `samples` occurrences after `from`.
    ///
    /// Takes the largest gap seen so irregular schedules (weekdays only, the
    /// last day of a month) never under-estimate the interval.
    pub fn infer_period(
        &self,
        from: DateTime<Utc>,
        samples: usize,
    ) -> Result<Duration, ScheduleError> {
        let times = self.occurrences_after(from, samples.max(2));
        if times.len() < 2 {
            return Err(ScheduleError::NoOccurrences(self.expr.clone()));
        }

        times
            .windows(2)
            .filter_map(|w| (w[1] - w[0]).to_std().ok())
            .max()
            .ok_or_else(|| ScheduleError::NoOccurrences(self.expr.clone()))
    }

    /// Most recent occurrence at or before `t`, searching back at most `period`.
    ///
    /// The backward walk is bounded: occurrences are enumerated forward from
    /// `t - period`, so the cost is one period's worth of occurrences.
    pub fn previous_at_or_before(
        &self,
        t: DateTime<Utc>,
        period: Duration,
    ) -> Option<DateTime<Utc>> {
        let lookback = period.checked_add(Duration::from_secs(1))?;
        let start = guardian_core::duration::checked_before(t, lookback)?.with_timezone(&self.tz);
        self.schedule
            .after(&start)
            .map(|dt| dt.with_timezone(&Utc))
            .take_while(|dt| *dt <= t)
            .last()
    }
}
