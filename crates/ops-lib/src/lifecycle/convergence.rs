//! Convergence predicates and poll descriptions
//!
//! Pure functions over a freshly read [`Workload`]; the polling loop decides
//! when to call them.

use crate::models::Workload;

/// Scale is done once the controller reports `replicas` available pods
pub fn scale_converged(workload: &Workload, replicas: i32) -> bool {
    workload.status.available == replicas
}

/// A rollout is done once the controller has observed the latest
/// generation and every desired pod is updated and available.
pub fn rollout_converged(workload: &Workload) -> bool {
    let desired = workload.desired_replicas;
    let status = &workload.status;
    status.observed_generation >= workload.generation
        && status.updated == desired
        && status.available == desired
        && status.unavailable == 0
}

/// Rollout convergence plus no surplus pods from the old replica set
pub fn rollback_converged(workload: &Workload) -> bool {
    rollout_converged(workload) && workload.status.replicas == workload.desired_replicas
}

pub fn describe_scale(workload: &Workload, replicas: i32) -> String {
    format!(
        "{}: {}/{} replicas available",
        workload.reference(),
        workload.status.available,
        replicas
    )
}

pub fn describe_rollout(workload: &Workload) -> String {
    let status = &workload.status;
    let desired = workload.desired_replicas;
    let mut line = format!(
        "{}: {}/{} updated, {}/{} available",
        workload.reference(),
        status.updated,
        desired,
        status.available,
        desired
    );
    if status.unavailable > 0 {
        line.push_str(&format!(", {} unavailable", status.unavailable));
    }
    if status.replicas > desired {
        line.push_str(&format!(", {} old replicas terminating", status.replicas - desired));
    }
    if status.observed_generation < workload.generation {
        line.push_str(" (waiting for controller)");
    }
    line
}
