//! NATS JetStream [`Broker`] backend.
//!
//! Streams map to JetStream streams, durable pull consumers carry the
//! ack-wait/max-deliver configuration, and the ephemeral subscription uses a
//! core NATS subscription so the fan-out hub can observe work-queue subjects
//! without competing with their durable consumer.

use std::time::Duration;

use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::stream::{Config as JsStreamConfig, RetentionPolicy};
use async_nats::jetstream::{AckKind, Context};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use sentinel_broker::{
    AckHandle, Broker, BrokerError, Consumer, ConsumerSpec, Delivery, Retention, StreamSpec,
    Subscription,
};

/// JetStream-backed broker.
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: Context,
}

impl NatsBroker {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    /// Wrap an existing client (used by integration tests).
    #[must_use]
    pub fn from_client(client: async_nats::Client) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());
        Self { client, jetstream }
    }
}

/// Map a backend error message to the broker error taxonomy. JetStream
/// reports a deleted consumer as "consumer not found" or, during a fetch,
/// as "no responders".
fn classify(text: String) -> BrokerError {
    let lower = text.to_lowercase();
    if lower.contains("consumer not found")
        || lower.contains("consumer deleted")
        || lower.contains("no responders")
    {
        BrokerError::ConsumerMissing(text)
    } else if lower.contains("stream not found") {
        BrokerError::StreamNotFound(text)
    } else {
        BrokerError::Backend(text)
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError> {
        let retention = match spec.retention {
            Retention::Limits => RetentionPolicy::Limits,
            Retention::WorkQueue => RetentionPolicy::WorkQueue,
        };
        self.jetstream
            .get_or_create_stream(JsStreamConfig {
                name: spec.name.clone(),
                subjects: spec.subjects.clone(),
                retention,
                max_age: spec.max_age,
                max_messages: spec.max_messages,
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e.to_string()))?;
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        ack.await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn create_consumer(
        &self,
        stream: &str,
        spec: &ConsumerSpec,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        let js_stream = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| classify(e.to_string()))?;
        let consumer = js_stream
            .get_or_create_consumer(
                &spec.name,
                pull::Config {
                    durable_name: Some(spec.name.clone()),
                    filter_subject: spec.filter_subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: spec.ack_wait,
                    max_deliver: i64::from(spec.max_deliver),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| classify(e.to_string()))?;
        Ok(Box::new(NatsConsumer { consumer }))
    }

    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<bool, BrokerError> {
        let js_stream = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| classify(e.to_string()))?;
        match js_stream.delete_consumer(name).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = classify(e.to_string());
                if err.is_consumer_missing() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn purge_stream(&self, stream: &str) -> Result<(), BrokerError> {
        let js_stream = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(|e| classify(e.to_string()))?;
        js_stream
            .purge()
            .await
            .map_err(|e| classify(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let subscriber = self
            .client
            .subscribe(filter.to_string())
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?;
        Ok(Box::new(NatsSubscription { subscriber }))
    }
}

struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<(String, Bytes)> {
        self.subscriber
            .next()
            .await
            .map(|m| (m.subject.to_string(), m.payload))
    }
}

struct NatsConsumer {
    consumer: async_nats::jetstream::consumer::Consumer<pull::Config>,
}

#[async_trait]
impl Consumer for NatsConsumer {
    async fn fetch(
        &mut self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| classify(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| classify(e.to_string()))?;
            let attempt = message
                .info()
                .ok()
                .and_then(|info| u32::try_from(info.delivered).ok())
                .unwrap_or(1);
            out.push(Delivery::new(
                message.subject.to_string(),
                message.payload.clone(),
                attempt,
                Box::new(NatsAckHandle { message }),
            ));
        }
        Ok(out)
    }
}

struct NatsAckHandle {
    message: async_nats::jetstream::Message,
}

#[async_trait]
impl AckHandle for NatsAckHandle {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))
    }

    async fn term(&self) -> Result<(), BrokerError> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn conformance() {
        let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".into());
        let broker = NatsBroker::connect(&url).await.expect("nats connection");
        let prefix = format!("it{}", std::process::id());
        sentinel_broker::testing::run_broker_conformance(&broker, &prefix)
            .await
            .expect("conformance suite");
    }
}
