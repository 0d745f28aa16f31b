use thiserror::Error;

use stockledger_core::{BucketKey, DomainError};

pub type StoreResult<T> = Result<T, StoreError>;

/// Engine/store operation error.
///
/// Guard failures arrive as [`StoreError::Domain`] and carry the domain error
/// unchanged. The other variants are infrastructure failures: a bucket lock
/// that could not be acquired in time, the database, or configuration.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("timed out after {timeout_ms} ms waiting for the lock on {bucket}")]
    LockTimeout { bucket: BucketKey, timeout_ms: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// The domain error, when this is a guard failure.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(err) => Some(err),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(err) => err.kind(),
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Log a rejected operation at debug and hand the result back untouched.
pub(crate) trait LogRejection {
    fn log_rejection(self, operation: &'static str) -> Self;
}

impl<T> LogRejection for StoreResult<T> {
    fn log_rejection(self, operation: &'static str) -> Self {
        if let Err(err) = &self {
            tracing::debug!(operation, kind = err.kind(), error = %err, "operation rejected");
        }
        self
    }
}
