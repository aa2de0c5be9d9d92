use std::sync::Arc;

use sentinel_broker::Broker;
use sentinel_pipeline::{Authorizer, PipelineMetrics, SensorControl};
use sentinel_store::Store;

use crate::hub::HubHandle;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub broker: Arc<dyn Broker>,
    /// Decision intake surface. The in-process authorizer in single-node
    /// runs; a store-backed instance when the authorizer runs elsewhere.
    pub authorizer: Arc<Authorizer>,
    /// Sensor control handle, present when a sensor runs in this process.
    pub sensor: Option<Arc<SensorControl>>,
    pub metrics: Arc<PipelineMetrics>,
    pub hub: HubHandle,
    pub agent_id: String,
}
