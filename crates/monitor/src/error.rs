use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate workload: {0}")]
    Duplicate(String),

    #[error("workload source unavailable: {0}")]
    Unavailable(String),
}
