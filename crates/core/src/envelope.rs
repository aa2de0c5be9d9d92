use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The pipeline stage that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Sensor,
    Classifier,
    Correlator,
    Planner,
    Authorizer,
    Effector,
    Gateway,
}

impl SourceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Classifier => "classifier",
            Self::Correlator => "correlator",
            Self::Planner => "planner",
            Self::Authorizer => "authorizer",
            Self::Effector => "effector",
            Self::Gateway => "gateway",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common header carried by every wire message.
///
/// `correlation_id` is shared by every message descended from a single
/// originating detection; `causation_id` is the `message_id` of the immediate
/// parent. Together they make the full causal chain reconstructable from the
/// persisted stream alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Envelope {
    /// Time-ordered unique message identifier (UUID v7).
    pub message_id: Uuid,

    /// Identifier shared by every message descended from one detection.
    pub correlation_id: Uuid,

    /// `message_id` of the immediate parent message, if any.
    pub causation_id: Option<Uuid>,

    /// Producer identifier (agent id of the emitting process).
    pub source: String,

    /// Stage that produced the message.
    pub source_type: SourceType,

    /// UTC creation time.
    pub timestamp: DateTime<Utc>,

    /// Keyed MAC over the serialized message with this field emptied.
    /// Empty until [`Message::sign`](crate::message::Message::sign) runs.
    #[serde(default)]
    pub signature: String,

    /// Version of the policy bundle in force when the message was produced.
    #[serde(default)]
    pub policy_version: String,

    /// OpenTelemetry trace identifier, propagated unchanged down the chain.
    #[serde(default)]
    pub trace_id: String,

    /// OpenTelemetry span identifier of the producing operation.
    #[serde(default)]
    pub span_id: String,
}

impl Envelope {
    /// Create the envelope for an originating message (no parent). The
    /// correlation id is the message's own id, so descendants correlate back
    /// to it.
    #[must_use]
    pub fn root(source: impl Into<String>, source_type: SourceType) -> Self {
        let message_id = Uuid::now_v7();
        Self {
            message_id,
            correlation_id: message_id,
            causation_id: None,
            source: source.into(),
            source_type,
            timestamp: Utc::now(),
            signature: String::new(),
            policy_version: String::new(),
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
        }
    }

    /// Create the envelope for a message caused by `parent`.
    ///
    /// Inherits the parent's correlation id (promoting the parent's message
    /// id when the parent carries none) and records the parent's message id
    /// as the causation id. The trace id is carried through; the span id is
    /// fresh for the new operation.
    #[must_use]
    pub fn child_of(parent: &Envelope, source: impl Into<String>, source_type: SourceType) -> Self {
        let correlation_id = if parent.correlation_id.is_nil() {
            parent.message_id
        } else {
            parent.correlation_id
        };
        Self {
            message_id: Uuid::now_v7(),
            correlation_id,
            causation_id: Some(parent.message_id),
            source: source.into(),
            source_type,
            timestamp: Utc::now(),
            signature: String::new(),
            policy_version: parent.policy_version.clone(),
            trace_id: if parent.trace_id.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                parent.trace_id.clone()
            },
            span_id: new_span_id(),
        }
    }

    /// Set the policy bundle version recorded in the envelope.
    #[must_use]
    pub fn with_policy_version(mut self, version: impl Into<String>) -> Self {
        self.policy_version = version.into();
        self
    }
}

/// 16-hex-char span identifier.
fn new_span_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_envelope_self_correlates() {
        let env = Envelope::root("sensor-1", SourceType::Sensor);
        assert_eq!(env.correlation_id, env.message_id);
        assert!(env.causation_id.is_none());
        assert!(env.signature.is_empty());
        assert_eq!(env.trace_id.len(), 32);
        assert_eq!(env.span_id.len(), 16);
    }

    #[test]
    fn child_inherits_correlation_and_records_causation() {
        let root = Envelope::root("sensor-1", SourceType::Sensor);
        let child = Envelope::child_of(&root, "classifier-1", SourceType::Classifier);
        let grandchild = Envelope::child_of(&child, "correlator-1", SourceType::Correlator);

        assert_eq!(child.correlation_id, root.message_id);
        assert_eq!(child.causation_id, Some(root.message_id));
        assert_eq!(grandchild.correlation_id, root.message_id);
        assert_eq!(grandchild.causation_id, Some(child.message_id));
        assert_eq!(grandchild.trace_id, root.trace_id);
        assert_ne!(grandchild.span_id, root.span_id);
    }

    #[test]
    fn child_promotes_message_id_when_correlation_absent() {
        let mut parent = Envelope::root("sensor-1", SourceType::Sensor);
        parent.correlation_id = Uuid::nil();
        let child = Envelope::child_of(&parent, "classifier-1", SourceType::Classifier);
        assert_eq!(child.correlation_id, parent.message_id);
    }

    #[test]
    fn message_ids_are_time_ordered() {
        let a = Envelope::root("s", SourceType::Sensor);
        // v7 ids embed a millisecond timestamp; step past the tie window.
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Envelope::root("s", SourceType::Sensor);
        assert!(a.message_id < b.message_id);
    }
}
