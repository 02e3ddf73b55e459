//! Store error types.

use thiserror::Error;

use crate::ids::WindowTypeId;
use crate::validation::ValidationErrors;

/// Errors returned by a [`crate::store::ContextWindowTypeStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No type with this id.
    #[error("context window type not found: {0}")]
    NotFound(WindowTypeId),
    /// The candidate failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    /// The default type cannot be deleted or demoted.
    #[error("context window type {0} is the default and cannot be removed")]
    DefaultUndeletable(WindowTypeId),
    /// No type is marked default.
    #[error("no default context window type configured")]
    NoDefault,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
