//! Shared worker machinery: the error taxonomy, the consume loop with
//! consumer recreation, and envelope attestation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sentinel_broker::{Broker, BrokerError, Consumer, ConsumerSpec, Delivery};
use sentinel_core::Message;
use sentinel_store::StoreError;

use crate::metrics::PipelineMetrics;

/// How a failed message should be settled.
///
/// Malformed input is terminated (removed without retry); transient
/// infrastructure failures are negatively acknowledged so the broker
/// redelivers up to the consumer's max-delivery count.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<StoreError> for WorkerError {
    fn from(e: StoreError) -> Self {
        Self::Transient(e.to_string())
    }
}

impl From<BrokerError> for WorkerError {
    fn from(e: BrokerError) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Outcome of handling one delivery.
pub enum Handled {
    /// Processed; the loop acks.
    Done(Delivery),
    /// The handler took ownership of the delivery handle and will settle it
    /// later (authorizer intake).
    Retained,
    /// Unparseable or semantically dead; the loop terminates it.
    Malformed(Delivery, String),
    /// Transient failure; the loop naks for redelivery.
    Transient(Delivery, String),
}

/// One pipeline stage's message handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Process one delivery without settling it.
    async fn process(&self, delivery: &Delivery) -> Result<(), WorkerError>;

    /// Process and decide the settlement. The default maps the result of
    /// [`process`](Self::process); handlers that retain deliveries override
    /// this.
    async fn handle(&self, delivery: Delivery) -> Handled {
        match self.process(&delivery).await {
            Ok(()) => Handled::Done(delivery),
            Err(WorkerError::Malformed(reason)) => Handled::Malformed(delivery, reason),
            Err(WorkerError::Transient(reason)) => Handled::Transient(delivery, reason),
        }
    }
}

/// Batch-fetching consume loop.
///
/// Fetches with a bounded wait, dispatches to the handler, settles each
/// delivery, and recreates the consumer with its original configuration when
/// the broker reports it missing. In-flight batches drain before shutdown
/// completes.
pub struct ConsumeLoop {
    broker: Arc<dyn Broker>,
    stream: &'static str,
    spec: ConsumerSpec,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<PipelineMetrics>,
    batch_size: usize,
    fetch_wait: Duration,
}

impl ConsumeLoop {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        stream: &'static str,
        spec: ConsumerSpec,
        handler: Arc<dyn MessageHandler>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            broker,
            stream,
            spec,
            handler,
            metrics,
            batch_size: 16,
            fetch_wait: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn with_fetch_wait(mut self, fetch_wait: Duration) -> Self {
        self.fetch_wait = fetch_wait;
        self
    }

    /// Run until `shutdown` fires. Returns when the in-flight batch has
    /// drained.
    pub async fn run(self, shutdown: CancellationToken) {
        let worker = self.handler.name();
        let mut consumer: Option<Box<dyn Consumer>> = None;

        info!(worker, stream = self.stream, consumer = %self.spec.name, "consume loop started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if consumer.is_none() {
                match self.broker.create_consumer(self.stream, &self.spec).await {
                    Ok(created) => consumer = Some(created),
                    Err(e) => {
                        error!(worker, error = %e, "consumer creation failed, backing off");
                        tokio::select! {
                            () = shutdown.cancelled() => break,
                            () = tokio::time::sleep(Duration::from_secs(1)) => {}
                        }
                        continue;
                    }
                }
            }
            let Some(active) = consumer.as_mut() else {
                continue;
            };

            let batch = tokio::select! {
                () = shutdown.cancelled() => break,
                batch = active.fetch(self.batch_size, self.fetch_wait) => batch,
            };

            match batch {
                Ok(deliveries) => {
                    // Drain the whole batch even if shutdown fires mid-way:
                    // these messages are already outstanding.
                    for delivery in deliveries {
                        self.settle(worker, self.handler.handle(delivery).await).await;
                    }
                }
                Err(e) if e.is_consumer_missing() => {
                    warn!(worker, error = %e, "consumer missing, recreating with original configuration");
                    consumer = None;
                }
                Err(e) => {
                    warn!(worker, error = %e, "fetch failed, backing off");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(worker, "consume loop stopped");
    }

    async fn settle(&self, worker: &'static str, handled: Handled) {
        match handled {
            Handled::Done(delivery) => {
                PipelineMetrics::incr(&self.metrics.messages_processed);
                if let Err(e) = delivery.ack().await {
                    warn!(worker, error = %e, "ack failed");
                }
            }
            Handled::Retained => {
                PipelineMetrics::incr(&self.metrics.messages_processed);
            }
            Handled::Malformed(delivery, reason) => {
                PipelineMetrics::incr(&self.metrics.messages_terminated);
                warn!(worker, subject = %delivery.subject, reason, "terminating malformed message");
                if let Err(e) = delivery.term().await {
                    warn!(worker, error = %e, "term failed");
                }
            }
            Handled::Transient(delivery, reason) => {
                PipelineMetrics::incr(&self.metrics.messages_retried);
                debug!(
                    worker,
                    subject = %delivery.subject,
                    attempt = delivery.attempt,
                    reason,
                    "transient failure, requesting redelivery"
                );
                if let Err(e) = delivery.nak().await {
                    warn!(worker, error = %e, "nak failed");
                }
            }
        }
    }
}

/// Parse a JSON payload into a message type, mapping failures to
/// [`WorkerError::Malformed`].
pub fn decode<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, WorkerError> {
    serde_json::from_slice(payload).map_err(WorkerError::from)
}

/// Origin attestation applied to every consumed message: the envelope must
/// carry a MAC and it must verify against the process signing secret. A
/// failure is a malformed-input condition (terminate, do not retry).
pub fn attest<M: Message>(message: &M, secret: &[u8]) -> Result<(), WorkerError> {
    match message.verify(secret) {
        Ok(true) => Ok(()),
        Ok(false) => Err(WorkerError::Malformed(
            "envelope signature missing or invalid".into(),
        )),
        Err(e) => Err(WorkerError::Malformed(format!(
            "envelope signature unverifiable: {e}"
        ))),
    }
}

/// Serialize, then publish a signed message to its derived subject.
pub async fn publish_message<M: Message>(
    broker: &dyn Broker,
    message: &M,
) -> Result<(), WorkerError> {
    let payload = serde_json::to_vec(message).map_err(WorkerError::from)?;
    broker
        .publish(&message.subject(), payload.into())
        .await
        .map_err(WorkerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{Detection, Position, Velocity};

    fn detection() -> Detection {
        Detection::new(
            "sensor-1",
            "H-TRK-0001",
            "sensor-1",
            "radar",
            Position {
                latitude: 35.0,
                longitude: 139.0,
                altitude: 8000.0,
            },
            Velocity {
                speed_mps: 650.0,
                heading_deg: 270.0,
            },
            0.9,
            None,
        )
    }

    #[test]
    fn attest_accepts_valid_signature() {
        let mut d = detection();
        d.sign(b"secret").unwrap();
        assert!(attest(&d, b"secret").is_ok());
    }

    #[test]
    fn attest_rejects_unsigned_and_tampered() {
        let unsigned = detection();
        assert!(matches!(
            attest(&unsigned, b"secret"),
            Err(WorkerError::Malformed(_))
        ));

        let mut tampered = detection();
        tampered.sign(b"secret").unwrap();
        tampered.confidence = 0.1;
        assert!(matches!(
            attest(&tampered, b"secret"),
            Err(WorkerError::Malformed(_))
        ));
    }

    #[test]
    fn decode_maps_parse_errors_to_malformed() {
        let result: Result<Detection, WorkerError> = decode(b"{not json");
        assert!(matches!(result, Err(WorkerError::Malformed(_))));
    }
}
