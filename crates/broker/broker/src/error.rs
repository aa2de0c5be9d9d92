use thiserror::Error;

/// Errors surfaced by broker backends.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not reach the broker.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// The named stream does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The consumer was deleted or never created. Consume loops recreate
    /// the consumer with its original configuration on this class.
    #[error("consumer missing: {0}")]
    ConsumerMissing(String),

    /// A publish was rejected or timed out.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Any other backend failure; treated as transient.
    #[error("broker backend error: {0}")]
    Backend(String),
}

impl BrokerError {
    /// Whether the error indicates a missing or deleted consumer, i.e. the
    /// caller should recreate the consumer and resume.
    #[must_use]
    pub fn is_consumer_missing(&self) -> bool {
        matches!(self, Self::ConsumerMissing(_))
    }
}
