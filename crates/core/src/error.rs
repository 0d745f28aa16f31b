//! Domain error model.

use thiserror::Error;

use crate::bucket::BucketKey;
use crate::id::UnitId;
use crate::quantity::Quantity;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every guard failure is one of these. They are surfaced to the caller as-is:
/// the domain never retries, downgrades or swallows them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A balance would go negative, or a reservation increment exceeds what is available.
    #[error("insufficient stock for {bucket}: requested {requested}, available {available}")]
    InsufficientStock {
        bucket: BucketKey,
        requested: Quantity,
        available: Quantity,
    },

    /// Quantity/unit/ordering-limit violation or malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced order line, product, reservation, ... is absent or deleted.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness violation (e.g. idempotency key reused with a different payload).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Write-path bypass attempt, or a picked/to-pick bound violation.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// No direct conversion factor is registered for the unit pair.
    #[error("no conversion registered from unit {from} to unit {to}")]
    ConversionNotFound { from: UnitId, to: UnitId },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn insufficient_stock(bucket: BucketKey, requested: Quantity, available: Quantity) -> Self {
        Self::InsufficientStock {
            bucket,
            requested,
            available,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short stable name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::ConversionNotFound { .. } => "conversion_not_found",
            Self::InvalidId(_) => "invalid_id",
        }
    }
}
