pub mod authorizer;
pub mod classifier;
pub mod correlator;
pub mod effector;
pub mod metrics;
pub mod planner;
pub mod runtime;
pub mod sensor;
pub mod topology;

use std::sync::Arc;

use sentinel_broker::Broker;
use sentinel_policy::PolicyClient;
use sentinel_store::Store;

pub use authorizer::{Authorizer, DecideError, DecideRequest};
pub use classifier::Classifier;
pub use correlator::Correlator;
pub use effector::{Effector, ExecutionMode};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use planner::Planner;
pub use runtime::{ConsumeLoop, Handled, MessageHandler, WorkerError};
pub use sensor::{SensorControl, SensorWorker};

/// Shared dependencies injected into every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn Store>,
    pub policy: Arc<dyn PolicyClient>,
    pub metrics: Arc<PipelineMetrics>,
    /// Producer identifier stamped into envelopes.
    pub agent_id: String,
    /// Envelope MAC key.
    pub signing_secret: Arc<Vec<u8>>,
    /// Policy bundle version recorded in envelopes.
    pub policy_version: String,
}

impl WorkerContext {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn Store>,
        policy: Arc<dyn PolicyClient>,
        agent_id: impl Into<String>,
        signing_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            broker,
            store,
            policy,
            metrics: Arc::new(PipelineMetrics::default()),
            agent_id: agent_id.into(),
            signing_secret: Arc::new(signing_secret.into()),
            policy_version: String::new(),
        }
    }
}
