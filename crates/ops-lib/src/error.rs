//! Error taxonomy for cluster and monitoring operations

use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the gateway, the lifecycle operations and the
/// duty/alert bridge.
///
/// Orchestrator errors are classified at the gateway boundary so callers can
/// branch on kind rather than on message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// The named object does not exist. Terminal, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency clash: the object changed between read and write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network or server-side failure that may succeed if repeated.
    #[error("transient error: {0}")]
    Transient(String),

    /// The caller-supplied deadline elapsed.
    #[error("deadline exceeded while {0}")]
    Timeout(String),

    /// Any other terminal orchestrator error.
    #[error("{0}")]
    Failed(String),

    /// Fewer than two revisions exist, so there is nothing to roll back to.
    #[error("not enough revisions to roll back (need at least 2, found {found})")]
    InsufficientHistory { found: usize },

    /// The requested revision is not part of the workload's history.
    #[error("revision {0} not found")]
    RevisionNotFound(i64),

    /// The operation was aborted by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A target string or operation parameter could not be accepted.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Prometheus/Alertmanager request or decoding failure.
    #[error("monitoring error: {0}")]
    Monitoring(String),

    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn timeout(activity: impl Into<String>) -> Self {
        Self::Timeout(activity.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    pub fn monitoring(msg: impl Into<String>) -> Self {
        Self::Monitoring(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for every "the thing you asked for does not exist" condition,
    /// including unresolvable rollback targets.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::RevisionNotFound(_) | Error::InsufficientHistory { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Conflict(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Classify a Kubernetes client error.
///
/// 404 maps to `NotFound`, 409 to `Conflict`, 429 and 5xx (plus transport
/// failures) to `Transient`; everything else is `Failed`.
impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => Error::NotFound(resp.message),
                409 => Error::Conflict(resp.message),
                429 | 500..=599 => Error::Transient(format!("{} ({})", resp.message, resp.code)),
                code => Error::Failed(format!("{} ({})", resp.message, code)),
            },
            kube::Error::HyperError(e) => Error::Transient(e.to_string()),
            kube::Error::Service(e) => Error::Transient(e.to_string()),
            other => Error::Failed(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Monitoring(err.to_string())
    }
}
