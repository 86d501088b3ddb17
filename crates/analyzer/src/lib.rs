//! SLA analysis: success rate, duration limits, duration regression,
//! dead-man's switch and stuck runs, computed from execution history.

pub mod analyzer;
pub mod error;
pub mod types;


pub use analyzer::SlaAnalyzer;
pub use error::AnalyzerError;
pub use types::{RegressionResult, SlaResult, SlaViolation, StuckExecution};
