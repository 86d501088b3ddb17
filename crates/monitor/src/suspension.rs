//! Tracks how long workloads have been suspended.
//!
//! The reconciler only reports a suspended flag, so the first time a
//! suspension is observed is taken as its start.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use guardian_core::WorkloadId;

/// What one observation of a workload's suspended flag means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    NotSuspended,
    /// First time seen suspended; tracking starts now.
    FirstSeen,
    StillSuspended {
        since: DateTime<Utc>,
        duration: Duration,
    },
    /// Was tracked as suspended, now running again. Tracking dropped.
    Resumed,
}

#[derive(Debug, Default)]
pub struct SuspensionTracker {
    first_seen: Mutex<HashMap<WorkloadId, DateTime<Utc>>>,
}

impl SuspensionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<WorkloadId, DateTime<Utc>>> {
        self.first_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn observe(&self, id: &WorkloadId, suspended: bool, now: DateTime<Utc>) -> Observation {
        let mut map = self.map();
        if !suspended {
            return if map.remove(id).is_some() {
                Observation::Resumed
            } else {
                Observation::NotSuspended
            };
        }
        match map.get(id) {
            Some(&since) => Observation::StillSuspended {
                since,
                duration: (now - since).to_std().unwrap_or_default(),
            },
            None => {
                map.insert(id.clone(), now);
                Observation::FirstSeen
            }
        }
    }

    pub fn suspended_since(&self, id: &WorkloadId) -> Option<DateTime<Utc>> {
        self.map().get(id).copied()
    }

    /// Drop entries for workloads no longer listed. Returns how many went.
    pub fn retain_known(&self, known: &HashSet<WorkloadId>) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|id, _| known.contains(id));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
