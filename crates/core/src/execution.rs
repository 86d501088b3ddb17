//! Execution records: one run of a tracked workload.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::workload::WorkloadId;

/// One completed or running run of a tracked workload.
///
/// Records are append-only. Once `completion_time` is set the record is
/// frozen; [`ExecutionRecord::complete`] refuses to complete it twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub workload: WorkloadId,
    /// Name of the concrete job instance.
    pub job_name: String,
    pub start_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
}

impl ExecutionRecord {
    /// A run that has started but not finished.
    pub fn running(
        workload: WorkloadId,
        job_name: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            workload,
            job_name: job_name.into(),
            start_time,
            completion_time: None,
            succeeded: false,
            exit_code: None,
            failure_reason: None,
        }
    }

    /// A successful run that took `duration`.
    pub fn succeeded(
        workload: WorkloadId,
        job_name: impl Into<String>,
        start_time: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            completion_time: Some(start_time + crate::duration::to_chrono(duration)),
            succeeded: true,
            exit_code: Some(0),
            ..Self::running(workload, job_name, start_time)
        }
    }

    /// A failed run that took `duration`.
    pub fn failed(
        workload: WorkloadId,
        job_name: impl Into<String>,
        start_time: DateTime<Utc>,
        duration: Duration,
        exit_code: i32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            completion_time: Some(start_time + crate::duration::to_chrono(duration)),
            succeeded: false,
            exit_code: Some(exit_code),
            failure_reason: Some(reason.into()),
            ..Self::running(workload, job_name, start_time)
        }
    }

    pub fn is_running(&self) -> bool {
        self.completion_time.is_none()
    }

    /// Wall-clock duration, only for completed runs.
    pub fn duration(&self) -> Option<Duration> {
        let end = self.completion_time?;
        (end - self.start_time).to_std().ok()
    }

    /// How long a running record has been running at `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let end = self.completion_time.unwrap_or(now);
        (end - self.start_time).to_std().unwrap_or_default()
    }

    /// Mark a running record as finished.
    pub fn complete(
        &mut self,
        completion_time: DateTime<Utc>,
        succeeded: bool,
        exit_code: Option<i32>,
        failure_reason: Option<String>,
    ) -> Result<(), CoreError> {
        if self.completion_time.is_some() {
            return Err(CoreError::ImmutableRecord(format!(
                "{} job {}",
                self.workload, self.job_name
            )));
        }
        self.completion_time = Some(completion_time);
        self.succeeded = succeeded;
        self.exit_code = exit_code;
        self.failure_reason = failure_reason;
        Ok(())
    }
}
