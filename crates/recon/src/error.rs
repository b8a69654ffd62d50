use thiserror::Error;

use crate::model::RecordId;

/// Failure reported by a store capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store cannot be reached or queried at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store refused a write (constraint, lock, read-only, ...).
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("record {id} not found in dataset '{dataset}'")]
    NotFound { dataset: String, id: RecordId },
    /// An id above `i64::MAX` cannot be stored as an integer attribute.
    #[error("record id {0} does not fit an integer attribute")]
    IdOutOfRange(RecordId),
    #[error("store error: {0}")]
    Backend(String),
}

/// Run-level errors. Per-candidate failures never surface here; they are
/// counted in the report instead.
#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Job validation error (empty chain, duplicate strategy, bad attribute, ...).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// The job needs a store capability the store does not offer.
    #[error("store lacks capability '{capability}' required by {required_by}")]
    MissingCapability {
        capability: &'static str,
        required_by: String,
    },
    /// Enumeration failed; no candidate was processed.
    #[error("source unavailable for dataset '{dataset}': {source}")]
    SourceUnavailable {
        dataset: String,
        #[source]
        source: StoreError,
    },
    /// Only raised when the job runs with `strict_invariants`.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// A driver callback stopped the run between batches.
    #[error("run interrupted: {0}")]
    Interrupted(String),
}
