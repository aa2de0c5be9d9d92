use std::time::Duration;

/// Message retention mode for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Messages stay until size/age limits evict them; every consumer sees
    /// every message.
    Limits,
    /// Each message is delivered to exactly one consumer and removed on ack.
    WorkQueue,
}

/// Declarative description of a stream. Backends create the stream if absent
/// and leave an existing one untouched.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: String,
    /// Subject globs captured by the stream (NATS-style `*`/`>` wildcards).
    pub subjects: Vec<String>,
    pub retention: Retention,
    /// Messages older than this are evicted.
    pub max_age: Duration,
    /// Maximum retained message count; `-1` for unlimited.
    pub max_messages: i64,
}

impl StreamSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subjects: vec![subject.into()],
            retention: Retention::Limits,
            max_age: Duration::from_secs(24 * 60 * 60),
            max_messages: -1,
        }
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_max_messages(mut self, max_messages: i64) -> Self {
        self.max_messages = max_messages;
        self
    }
}

/// Declarative description of a durable consumer on a stream.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Durable name; also the consumer-group identity for horizontal scale.
    pub name: String,
    /// Only messages matching this filter are delivered.
    pub filter_subject: String,
    /// How long a delivered message may stay unacked before redelivery.
    pub ack_wait: Duration,
    /// Delivery attempts before the broker stops redelivering.
    pub max_deliver: u32,
}

impl ConsumerSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, filter_subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter_subject: filter_subject.into(),
            ack_wait: Duration::from_secs(30),
            max_deliver: 3,
        }
    }

    #[must_use]
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    #[must_use]
    pub fn with_max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver;
        self
    }
}
