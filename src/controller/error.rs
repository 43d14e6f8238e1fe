//! Error types for the controller.
//!
//! Store failures keep the underlying `kube::Error` so the error policy can
//! tell transient infrastructure trouble from configuration drift.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Reading from the cluster state store failed
    #[error("failed to read {kind} {name}: {source}")]
    StoreRead {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// Writing to the cluster state store failed
    #[error("failed to write {kind} {name}: {source}")]
    StoreWrite {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// A builder step failed for a reason a schema-valid Redis cannot cause
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The surrounding context was cancelled mid-cycle
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The underlying API error, if any
    fn kube_error(&self) -> Option<&kube::Error> {
        match self {
            Error::StoreRead { source, .. } | Error::StoreWrite { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self.kube_error(), Some(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::StoreRead { source, .. } | Error::StoreWrite { source, .. } => {
                // Conflicts resolve on the next read, everything else 4xx is permanent
                matches!(
                    source,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || !matches!(source, kube::Error::Api(_))
            }
            Error::InvariantViolation(_) | Error::Serialization(_) | Error::Cancelled => false,
        }
    }

    /// Check if this error signals a shutdown rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
