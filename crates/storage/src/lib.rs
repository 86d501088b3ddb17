//! Execution-history and alert-history storage.
//!
//! The relational backend lives outside this workspace; everything here talks
//! to it through [`ExecutionStore`]. [`InMemoryStore`] backs tests and the
//! standalone worker.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use traits::{window_start, AlertQuery, AlertRecord, ExecutionStore};
