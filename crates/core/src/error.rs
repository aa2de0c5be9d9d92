use thiserror::Error;

/// A message or configuration field failed validation.
#[derive(Debug, Clone, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// The offending field, dotted-path style (e.g. `detection.confidence`).
    pub field: String,
    /// Why the value was rejected.
    pub reason: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
