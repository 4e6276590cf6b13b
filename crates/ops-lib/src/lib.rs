//! Deployment lifecycle control and duty/alert bridge
//!
//! This crate provides the core functionality for:
//! - Scaling, restarting and rolling back Kubernetes deployments with
//!   progress reporting, deadlines and cancellation
//! - Resolving rollback targets from replica set history
//! - Querying Prometheus and Alertmanager
//! - Notifying on-call users about active alerts
//! - Health checks and observability

pub mod duty;
pub mod error;
pub mod gateway;
pub mod health;
pub mod lifecycle;
pub mod locks;
pub mod models;
pub mod monitoring;
pub mod observability;
pub mod relay;
pub mod revision;

pub use error::{Error, Result};
pub use gateway::{ClusterGateway, KubeGateway, KubeSource, LogOptions};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{
    LifecycleConfig, LifecycleController, Operation, OperationBudgets, OperationKind,
    OperationState, Outcome, RevisionListing,
};
pub use locks::{TargetGuard, TargetLocks};
pub use models::*;
pub use observability::{OpsMetrics, StructuredLogger};
pub use relay::{ProgressEvent, ProgressReceiver, ProgressSender};
pub use revision::{RollbackPolicy, RollbackTarget};
