//! Error taxonomy for cache and orchestrator operations.
//!
//! Callers treat [`ResourceError::Wait`], [`ResourceError::LockWait`] and
//! [`ResourceError::DataInconsistent`] as "try again later". Everything else is
//! a defect or an unavailable dependency and is not retried.

use reservoir_coordination::CoordinationError;
use snafu::Snafu;

use crate::pool::Pool;
use crate::store::StoreError;

/// Why a recoverable wait was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// The cache counter did not exist yet; it has been (re)initialized.
    Uninitialized,
    /// The counter was at zero.
    Exhausted,
    /// Fewer permits than requested were available within the wait budget.
    Insufficient,
}

impl WaitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitReason::Uninitialized => "uninitialized",
            WaitReason::Exhausted => "exhausted",
            WaitReason::Insufficient => "insufficient",
        }
    }
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the cache accessor and the orchestrators.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ResourceError {
    /// Caller error or primitive malfunction. Not retryable.
    #[snafu(display("run error: {reason}"))]
    Run { reason: String },

    /// Permits are not available yet. Retry later.
    #[snafu(display("wait ({kind}) on {pool} {resource_ids:?}: {reason}"))]
    Wait {
        pool: Pool,
        resource_ids: Vec<String>,
        kind: WaitReason,
        reason: String,
    },

    /// A resource lock could not be taken within its wait budget.
    #[snafu(display("lock wait on {pool} {resource_ids:?}"))]
    LockWait { pool: Pool, resource_ids: Vec<String> },

    /// Cache and durable store disagree; the cache has been flagged or rebuilt.
    #[snafu(display("data inconsistent on {pool} {resource_ids:?}: {reason}"))]
    DataInconsistent {
        pool: Pool,
        resource_ids: Vec<String>,
        reason: String,
    },

    /// Durable store failure.
    #[snafu(display("store error: {source}"))]
    Store { source: StoreError },

    /// Cache substrate failure.
    #[snafu(display("coordination error: {source}"))]
    Coordination { source: CoordinationError },
}

impl ResourceError {
    pub(crate) fn run(reason: impl Into<String>) -> Self {
        ResourceError::Run { reason: reason.into() }
    }

    pub(crate) fn wait(pool: Pool, resource_ids: Vec<String>, kind: WaitReason, reason: impl Into<String>) -> Self {
        ResourceError::Wait {
            pool,
            resource_ids,
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn inconsistent(pool: Pool, resource_ids: Vec<String>, reason: impl Into<String>) -> Self {
        ResourceError::DataInconsistent {
            pool,
            resource_ids,
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResourceError::Wait { .. } | ResourceError::LockWait { .. } | ResourceError::DataInconsistent { .. }
        )
    }

    /// The wait kind, for `Wait` errors.
    pub fn wait_reason(&self) -> Option<WaitReason> {
        match self {
            ResourceError::Wait { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<CoordinationError> for ResourceError {
    fn from(source: CoordinationError) -> Self {
        ResourceError::Coordination { source }
    }
}

impl From<StoreError> for ResourceError {
    fn from(source: StoreError) -> Self {
        ResourceError::Store { source }
    }
}
