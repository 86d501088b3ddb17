//! Source of tracked workloads.
//!
//! The reconciler that keeps workload status current lives outside this
//! process; coordinators only see it through [`WorkloadProvider`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use guardian_core::{TrackedWorkload, WorkloadId};

use crate::error::ProviderError;

#[async_trait]
pub trait WorkloadProvider: Send + Sync {
    /// Current snapshot, in a stable order.
    async fn list(&self) -> Result<Vec<TrackedWorkload>, ProviderError>;
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadsFile {
    #[serde(default)]
    workloads: Vec<TrackedWorkload>,
}

/// Fixed workload list, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticProvider {
    workloads: RwLock<Vec<TrackedWorkload>>,
}

impl StaticProvider {
    pub fn new(workloads: Vec<TrackedWorkload>) -> Self {
        Self {
            workloads: RwLock::new(workloads),
        }
    }

    /// Parse a `workloads:` YAML document. Duplicate `namespace/name` pairs
    /// are rejected; workloads that fail validation are logged and left out.
    pub fn from_yaml(raw: &str) -> Result<Self, ProviderError> {
        let file: WorkloadsFile = serde_yaml::from_str(raw)?;
        let mut seen = HashSet::new();
        let mut workloads = Vec::with_capacity(file.workloads.len());
        for w in file.workloads {
            if !seen.insert(w.id.clone()) {
                return Err(ProviderError::Duplicate(w.id.to_string()));
            }
            match w.validate() {
                Ok(()) => workloads.push(w),
                Err(e) => warn!(workload = %w.id, error = %e, "skipping invalid workload"),
            }
        }
        Ok(Self::new(workloads))
    }

    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn replace(&self, workloads: Vec<TrackedWorkload>) {
        *self.workloads.write().unwrap_or_else(PoisonError::into_inner) = workloads;
    }

    /// Apply `f` to the workload with this id, if present.
    pub fn update(&self, id: &WorkloadId, f: impl FnOnce(&mut TrackedWorkload)) -> bool {
        let mut guard = self.workloads.write().unwrap_or_else(PoisonError::into_inner);
        match guard.iter_mut().find(|w| &w.id == id) {
            Some(w) => {
                f(w);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.workloads.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WorkloadProvider for StaticProvider {
    async fn list(&self) -> Result<Vec<TrackedWorkload>, ProviderError> {
        Ok(self
            .workloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
