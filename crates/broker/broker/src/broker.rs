use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BrokerError;
use crate::spec::{ConsumerSpec, StreamSpec};

/// Acknowledgement surface for one delivered message.
///
/// Implementations carry whatever backend state is needed to settle the
/// delivery later; the authorizer retains handles unacked until a human
/// adjudicates.
#[async_trait]
pub trait AckHandle: Send + Sync {
    /// Mark the message processed. On a work-queue stream this removes it.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negative acknowledgement: make the message immediately eligible for
    /// redelivery.
    async fn nak(&self) -> Result<(), BrokerError>;

    /// Terminate the message: remove it without further delivery attempts.
    async fn term(&self) -> Result<(), BrokerError>;
}

/// One message delivered to a consumer.
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
    /// 1-based delivery attempt.
    pub attempt: u32,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        payload: Bytes,
        attempt: u32,
        handle: Box<dyn AckHandle>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            attempt,
            handle,
        }
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.handle.ack().await
    }

    pub async fn nak(&self) -> Result<(), BrokerError> {
        self.handle.nak().await
    }

    pub async fn term(&self) -> Result<(), BrokerError> {
        self.handle.term().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// A pull consumer bound to one stream.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Fetch up to `max_messages`, waiting at most `max_wait` for the first.
    /// An empty result after the wait is normal.
    async fn fetch(
        &mut self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, BrokerError>;
}

/// An ephemeral subscription: receives matching messages published while it
/// is alive, independent of stream retention. Used by the gateway fan-out
/// hub, which must observe work-queue subjects without competing with their
/// durable consumer.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Next matching message, or `None` once the broker connection closes.
    async fn next(&mut self) -> Option<(String, Bytes)>;
}

/// The durable broker surface the pipeline is written against.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the stream if it does not exist.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError>;

    /// Publish a payload to a subject. The owning stream is resolved by
    /// subject match.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Create (or reattach to) a durable consumer on a stream.
    async fn create_consumer(
        &self,
        stream: &str,
        spec: &ConsumerSpec,
    ) -> Result<Box<dyn Consumer>, BrokerError>;

    /// Delete a durable consumer. Returns `false` if it did not exist.
    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<bool, BrokerError>;

    /// Remove every message from a stream.
    async fn purge_stream(&self, stream: &str) -> Result<(), BrokerError>;

    /// Open an ephemeral subscription on a subject filter.
    async fn subscribe(&self, filter: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}
