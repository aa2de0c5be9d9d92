use thiserror::Error;

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the database.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A row violated a unique constraint. Callers treat this as the
    /// idempotent-success signal for effect writes and pending-proposal
    /// inserts.
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    /// A value could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure; treated as transient.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the error is a unique-constraint collision.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}
