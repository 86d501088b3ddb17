use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration for {workload}: {reason}")]
    InvalidConfig { workload: String, reason: String },

    #[error("Execution record already completed: {0}")]
    ImmutableRecord(String),
}
