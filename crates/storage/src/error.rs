use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("core error: {0}")]
    Core(#[from] guardian_core::CoreError),

    #[error("execution {workload} job {job} is already complete")]
    AlreadyComplete { workload: String, job: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}
