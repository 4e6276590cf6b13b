//! Rollback target resolution over a deployment's revision history
//!
//! Revision numbers are assigned by the deployment controller and are not
//! guaranteed to be contiguous once old replica sets are pruned, so
//! "previous" is defined numerically as `current - 1`. Picking the
//! second-most-recent replica set by creation time is a different answer
//! whenever history has gaps or a rollback reused an old replica set; that
//! policy is available via [`previous_by_creation_time`] and
//! [`RollbackPolicy::CreationTime`], but it is not the default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::RevisionSnapshot;

/// Which revision a rollback should land on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTarget {
    /// A specific revision number
    Explicit(i64),
    /// The revision before the current one
    Previous,
}

impl fmt::Display for RollbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackTarget::Explicit(n) => write!(f, "revision {n}"),
            RollbackTarget::Previous => write!(f, "previous revision"),
        }
    }
}

impl FromStr for RollbackTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "previous" | "prev" | "0" => Ok(RollbackTarget::Previous),
            other => other
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(RollbackTarget::Explicit)
                .ok_or_else(|| Error::invalid_target(format!("invalid revision '{other}'"))),
        }
    }
}

/// How `RollbackTarget::Previous` is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// `current - 1` by revision number
    #[default]
    NumericAdjacency,
    /// Second-most-recent replica set by creation timestamp
    CreationTime,
}

/// Resolve a rollback target against the snapshot history.
///
/// `snapshots` is expected in the order returned by the gateway (ascending
/// revision) but the lookup does not depend on it.
pub fn resolve_target<'a>(
    snapshots: &'a [RevisionSnapshot],
    current_revision: Option<i64>,
    requested: RollbackTarget,
) -> Result<&'a RevisionSnapshot> {
    if snapshots.len() < 2 {
        return Err(Error::InsufficientHistory {
            found: snapshots.len(),
        });
    }

    let wanted = match requested {
        RollbackTarget::Explicit(n) => n,
        RollbackTarget::Previous => {
            let current = current_revision.ok_or_else(|| {
                Error::failed("deployment has no revision annotation; cannot determine previous revision")
            })?;
            current - 1
        }
    };

    snapshots
        .iter()
        .find(|s| s.revision == wanted)
        .ok_or(Error::RevisionNotFound(wanted))
}

/// Resolve a target honouring the configured policy for `Previous`
pub fn resolve_with_policy<'a>(
    snapshots: &'a [RevisionSnapshot],
    current_revision: Option<i64>,
    requested: RollbackTarget,
    policy: RollbackPolicy,
) -> Result<&'a RevisionSnapshot> {
    match (requested, policy) {
        (RollbackTarget::Previous, RollbackPolicy::CreationTime) => {
            previous_by_creation_time(snapshots)
        }
        _ => resolve_target(snapshots, current_revision, requested),
    }
}

/// Second-most-recent snapshot by creation time.
///
/// Snapshots without a timestamp sort oldest; ties fall back to revision.
pub fn previous_by_creation_time(snapshots: &[RevisionSnapshot]) -> Result<&RevisionSnapshot> {
    if snapshots.len() < 2 {
        return Err(Error::InsufficientHistory {
            found: snapshots.len(),
        });
    }

    let mut by_age: Vec<&RevisionSnapshot> = snapshots.iter().collect();
    by_age.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.revision.cmp(&a.revision))
    });
    Ok(by_age[1])
}
