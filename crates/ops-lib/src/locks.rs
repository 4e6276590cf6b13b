//! Advisory per-deployment locks
//!
//! The lifecycle controller allows concurrent operations on one deployment;
//! front ends that want at most one mutation per target take a
//! [`TargetGuard`] first.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::WorkloadRef;

/// Set of deployments with an operation in flight
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    held: Arc<DashMap<WorkloadRef, String>>,
}

/// Releases its target when dropped
#[derive(Debug)]
pub struct TargetGuard {
    held: Arc<DashMap<WorkloadRef, String>>,
    target: WorkloadRef,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `target` for `holder`, or `None` if someone already holds it
    pub fn try_acquire(&self, target: &WorkloadRef, holder: &str) -> Option<TargetGuard> {
        match self.held.entry(target.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(holder.to_string());
                Some(TargetGuard {
                    held: self.held.clone(),
                    target: target.clone(),
                })
            }
        }
    }

    /// Who holds `target`, if anyone
    pub fn holder(&self, target: &WorkloadRef) -> Option<String> {
        self.held.get(target).map(|h| h.value().clone())
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl TargetGuard {
    pub fn target(&self) -> &WorkloadRef {
        &self.target
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        self.held.remove(&self.target);
    }
}
