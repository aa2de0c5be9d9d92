//! In-process [`Broker`] backend.
//!
//! Implements the same observable semantics as the JetStream backend:
//! ack-wait redelivery, max-deliver caps, work-queue removal on settle,
//! max-age eviction, and ephemeral subscriptions. All state lives under one
//! mutex; expiry is applied lazily on access.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sentinel_broker::{
    AckHandle, Broker, BrokerError, Consumer, ConsumerSpec, Delivery, Retention, StreamSpec,
    Subscription, subject_matches,
};

/// How often a waiting fetch re-checks for new messages.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct StoredMessage {
    subject: String,
    payload: Bytes,
    published_at: Instant,
}

#[derive(Debug)]
struct Pending {
    delivered_at: Instant,
    attempts: u32,
    /// Set by nak: redeliver without waiting out the ack wait.
    redeliver_now: bool,
}

#[derive(Debug)]
struct ConsumerState {
    spec: ConsumerSpec,
    /// Next stream sequence to consider for first delivery.
    next_seq: u64,
    pending: HashMap<u64, Pending>,
    /// Settled (acked/terminated) or delivery-exhausted sequences.
    done: HashSet<u64>,
}

#[derive(Debug)]
struct StreamState {
    spec: StreamSpec,
    next_seq: u64,
    messages: BTreeMap<u64, StoredMessage>,
    consumers: HashMap<String, ConsumerState>,
}

impl StreamState {
    /// Drop messages past the stream's max age and over its size cap.
    fn evict(&mut self) {
        let max_age = self.spec.max_age;
        let expired: Vec<u64> = self
            .messages
            .iter()
            .filter(|(_, m)| m.published_at.elapsed() > max_age)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in expired {
            self.remove_message(seq);
        }
        if self.spec.max_messages > 0 {
            #[allow(clippy::cast_sign_loss)]
            let cap = self.spec.max_messages as usize;
            while self.messages.len() > cap {
                if let Some((&seq, _)) = self.messages.iter().next() {
                    self.remove_message(seq);
                } else {
                    break;
                }
            }
        }
    }

    fn remove_message(&mut self, seq: u64) {
        self.messages.remove(&seq);
        for consumer in self.consumers.values_mut() {
            consumer.pending.remove(&seq);
            consumer.done.remove(&seq);
        }
    }
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamState>,
    subscribers: Vec<(String, mpsc::UnboundedSender<(String, Bytes)>)>,
}

/// In-memory broker. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        inner
            .streams
            .entry(spec.name.clone())
            .or_insert_with(|| StreamState {
                spec: spec.clone(),
                next_seq: 1,
                messages: BTreeMap::new(),
                consumers: HashMap::new(),
            });
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();

        // Fan out to ephemeral subscribers regardless of stream placement.
        inner.subscribers.retain(|(filter, sender)| {
            if subject_matches(filter, subject) {
                sender.send((subject.to_string(), payload.clone())).is_ok()
            } else {
                !sender.is_closed()
            }
        });

        let stream = inner
            .streams
            .values_mut()
            .find(|s| s.spec.subjects.iter().any(|f| subject_matches(f, subject)))
            .ok_or_else(|| BrokerError::Publish(format!("no stream matches subject {subject}")))?;

        let seq = stream.next_seq;
        stream.next_seq += 1;
        stream.messages.insert(
            seq,
            StoredMessage {
                subject: subject.to_string(),
                payload,
                published_at: Instant::now(),
            },
        );
        stream.evict();
        Ok(())
    }

    async fn create_consumer(
        &self,
        stream: &str,
        spec: &ConsumerSpec,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        let mut inner = self.inner.lock();
        let state = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        state
            .consumers
            .entry(spec.name.clone())
            .or_insert_with(|| ConsumerState {
                spec: spec.clone(),
                next_seq: 1,
                pending: HashMap::new(),
                done: HashSet::new(),
            });
        Ok(Box::new(MemoryConsumer {
            inner: Arc::clone(&self.inner),
            stream: stream.to_string(),
            name: spec.name.clone(),
        }))
    }

    async fn delete_consumer(&self, stream: &str, name: &str) -> Result<bool, BrokerError> {
        let mut inner = self.inner.lock();
        let state = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        Ok(state.consumers.remove(name).is_some())
    }

    async fn purge_stream(&self, stream: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        let state = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        state.messages.clear();
        for consumer in state.consumers.values_mut() {
            consumer.pending.clear();
            consumer.done.clear();
            consumer.next_seq = state.next_seq;
        }
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .subscribers
            .push((filter.to_string(), sender));
        Ok(Box::new(MemorySubscription { receiver }))
    }
}

struct MemorySubscription {
    receiver: mpsc::UnboundedReceiver<(String, Bytes)>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<(String, Bytes)> {
        self.receiver.recv().await
    }
}

struct MemoryConsumer {
    inner: Arc<Mutex<Inner>>,
    stream: String,
    name: String,
}

impl MemoryConsumer {
    /// One non-blocking collection pass: expired/naked redeliveries first,
    /// then fresh messages.
    fn collect(&self, max_messages: usize) -> Result<Vec<Delivery>, BrokerError> {
        let mut inner = self.inner.lock();
        let state = inner
            .streams
            .get_mut(&self.stream)
            .ok_or_else(|| BrokerError::StreamNotFound(self.stream.clone()))?;
        state.evict();

        let work_queue = state.spec.retention == Retention::WorkQueue;
        let next_stream_seq = state.next_seq;

        // Disjoint field borrows: redeliveries walk both the consumer state
        // and the message map.
        let StreamState {
            messages, consumers, ..
        } = state;
        let Some(consumer) = consumers.get_mut(&self.name) else {
            return Err(BrokerError::ConsumerMissing(format!(
                "{} on stream {}",
                self.name, self.stream
            )));
        };

        let mut out = Vec::new();
        let now = Instant::now();
        let ack_wait = consumer.spec.ack_wait;
        let max_deliver = consumer.spec.max_deliver;

        let due: Vec<u64> = consumer
            .pending
            .iter()
            .filter(|(_, p)| p.redeliver_now || now.duration_since(p.delivered_at) >= ack_wait)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in due {
            if out.len() >= max_messages {
                break;
            }
            let Some(message) = messages.get(&seq) else {
                consumer.pending.remove(&seq);
                continue;
            };
            let Some(pending) = consumer.pending.get_mut(&seq) else {
                continue;
            };
            if pending.attempts >= max_deliver {
                consumer.pending.remove(&seq);
                consumer.done.insert(seq);
                continue;
            }
            pending.attempts += 1;
            pending.delivered_at = now;
            pending.redeliver_now = false;
            let attempt = pending.attempts;
            out.push(Delivery::new(
                message.subject.clone(),
                message.payload.clone(),
                attempt,
                Box::new(MemoryAckHandle {
                    inner: Arc::clone(&self.inner),
                    stream: self.stream.clone(),
                    consumer: self.name.clone(),
                    seq,
                    work_queue,
                }),
            ));
        }

        let mut cursor = consumer.next_seq;
        while out.len() < max_messages && cursor < next_stream_seq {
            let seq = cursor;
            cursor += 1;
            let Some(message) = messages.get(&seq) else {
                continue;
            };
            if !subject_matches(&consumer.spec.filter_subject, &message.subject) {
                continue;
            }
            if consumer.pending.contains_key(&seq) || consumer.done.contains(&seq) {
                continue;
            }
            consumer.pending.insert(
                seq,
                Pending {
                    delivered_at: now,
                    attempts: 1,
                    redeliver_now: false,
                },
            );
            out.push(Delivery::new(
                message.subject.clone(),
                message.payload.clone(),
                1,
                Box::new(MemoryAckHandle {
                    inner: Arc::clone(&self.inner),
                    stream: self.stream.clone(),
                    consumer: self.name.clone(),
                    seq,
                    work_queue,
                }),
            ));
        }
        consumer.next_seq = consumer.next_seq.max(cursor);

        Ok(out)
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn fetch(
        &mut self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let batch = self.collect(max_messages)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }
    }
}

struct MemoryAckHandle {
    inner: Arc<Mutex<Inner>>,
    stream: String,
    consumer: String,
    seq: u64,
    work_queue: bool,
}

impl MemoryAckHandle {
    fn settle(&self, remove_message: bool) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.streams.get_mut(&self.stream) else {
            return;
        };
        if let Some(consumer) = state.consumers.get_mut(&self.consumer) {
            consumer.pending.remove(&self.seq);
            consumer.done.insert(self.seq);
        }
        if remove_message {
            state.remove_message(self.seq);
        }
    }
}

#[async_trait]
impl AckHandle for MemoryAckHandle {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(self.work_queue);
        Ok(())
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(&self.stream)
            && let Some(consumer) = state.consumers.get_mut(&self.consumer)
            && let Some(pending) = consumer.pending.get_mut(&self.seq)
        {
            pending.redeliver_now = true;
        }
        Ok(())
    }

    async fn term(&self) -> Result<(), BrokerError> {
        // Settling removes a work-queue message just like ack: terminated
        // proposals must not be re-offered to another authorizer.
        self.settle(self.work_queue);
        Ok(())
    }
}
