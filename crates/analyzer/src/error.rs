use thiserror::Error;

use guardian_schedule::ScheduleError;
use guardian_storage::StoreError;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Not enough history to decide. Callers treat this as "no signal yet".
    #[error("insufficient history: need {needed} run(s), found {found}")]
    InsufficientHistory { needed: usize, found: usize },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

impl AnalyzerError {
    pub fn is_insufficient_history(&self) -> bool {
        matches!(self, AnalyzerError::InsufficientHistory { .. })
    }
}
