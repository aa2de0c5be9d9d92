pub mod error;
pub mod metrics;
pub mod query;
pub mod records;
pub mod store;
pub mod testing;

pub use error::StoreError;
pub use metrics::{LatencySummary, MetricsSummary, StageMetrics};
pub use query::{AuditQuery, DecisionQuery, EffectQuery, ProposalQuery, TrackQuery};
pub use records::{
    AuditRecord, DecisionRecord, DetectionRecord, EffectRecord, InterventionRule, ProposalRecord,
    ProposalStatus, TrackRecord,
};
pub use store::{ProposalInsert, Store};
