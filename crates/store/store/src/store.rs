use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::metrics::{LatencySummary, MetricsSummary, StageMetrics};
use crate::query::{AuditQuery, DecisionQuery, EffectQuery, ProposalQuery, TrackQuery};
use crate::records::{
    AuditRecord, DecisionRecord, DetectionRecord, EffectRecord, InterventionRule, ProposalRecord,
    ProposalStatus, TrackRecord,
};

/// Outcome of a pending-proposal insert.
#[derive(Debug)]
pub enum ProposalInsert {
    /// No pending proposal existed for the track; the row was created.
    Inserted,
    /// A pending proposal already existed: its `hit_count` was incremented,
    /// `last_hit_at` refreshed, and `priority` raised to the max of old and
    /// new. The merged row is returned.
    Merged(ProposalRecord),
}

/// The relational store surface the pipeline and gateway are written
/// against. Implementations must be safe for concurrent use.
#[async_trait]
pub trait Store: Send + Sync {
    // --- tracks -----------------------------------------------------------

    /// Insert or update a track row, bumping `last_updated`.
    async fn upsert_track(&self, track: &TrackRecord) -> Result<(), StoreError>;

    async fn get_track(&self, track_id: &str) -> Result<Option<TrackRecord>, StoreError>;

    /// Tracks matching the filters, newest update first.
    async fn list_tracks(&self, query: &TrackQuery) -> Result<Vec<TrackRecord>, StoreError>;

    // --- detections -------------------------------------------------------

    async fn insert_detection(&self, detection: &DetectionRecord) -> Result<(), StoreError>;

    /// Detection history for a track, newest first.
    async fn list_detections(
        &self,
        track_id: &str,
        limit: i64,
    ) -> Result<Vec<DetectionRecord>, StoreError>;

    // --- proposals --------------------------------------------------------

    /// Insert a pending proposal, honoring the partial unique index on
    /// `(track_id) WHERE status = 'pending'`. On conflict the existing
    /// pending row absorbs the hit (see [`ProposalInsert::Merged`]).
    async fn insert_pending_proposal(
        &self,
        proposal: &ProposalRecord,
    ) -> Result<ProposalInsert, StoreError>;

    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<ProposalRecord>, StoreError>;

    async fn list_proposals(
        &self,
        query: &ProposalQuery,
    ) -> Result<Vec<ProposalRecord>, StoreError>;

    /// Move a proposal from `pending` to a terminal status. Returns `false`
    /// (and changes nothing) when the proposal is absent or already
    /// terminal.
    async fn transition_proposal(
        &self,
        proposal_id: Uuid,
        to: ProposalStatus,
    ) -> Result<bool, StoreError>;

    // --- decisions --------------------------------------------------------

    async fn insert_decision(&self, decision: &DecisionRecord) -> Result<(), StoreError>;

    async fn get_decision(&self, decision_id: Uuid) -> Result<Option<DecisionRecord>, StoreError>;

    async fn list_decisions(
        &self,
        query: &DecisionQuery,
    ) -> Result<Vec<DecisionRecord>, StoreError>;

    // --- effects ----------------------------------------------------------

    /// Insert an effect row unless one with the same idempotent key exists
    /// (`INSERT .. ON CONFLICT DO NOTHING` semantics). Returns `true` when
    /// the row was written.
    async fn insert_effect(&self, effect: &EffectRecord) -> Result<bool, StoreError>;

    async fn get_effect_by_key(&self, idempotent_key: &str)
    -> Result<Option<EffectRecord>, StoreError>;

    async fn list_effects(&self, query: &EffectQuery) -> Result<Vec<EffectRecord>, StoreError>;

    // --- audit ------------------------------------------------------------

    /// Append to the write-once audit log.
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Audit entries matching the filters, newest first.
    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError>;

    // --- intervention rules ----------------------------------------------

    /// Rules in ascending `evaluation_order`.
    async fn list_rules(&self, enabled_only: bool) -> Result<Vec<InterventionRule>, StoreError>;

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<InterventionRule>, StoreError>;

    /// Insert or fully replace a rule.
    async fn upsert_rule(&self, rule: &InterventionRule) -> Result<(), StoreError>;

    /// Returns `false` if the rule did not exist.
    async fn delete_rule(&self, rule_id: Uuid) -> Result<bool, StoreError>;

    // --- counters ---------------------------------------------------------

    /// Atomically add `delta` to a named counter, creating it at zero.
    /// Returns the new value.
    async fn increment_counter(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError>;

    // --- aggregates -------------------------------------------------------

    /// Whole-system aggregate for the metrics surface. `since` bounds the
    /// "active tracks" window only; totals are all-time.
    async fn metrics_summary(&self, since: DateTime<Utc>) -> Result<MetricsSummary, StoreError>;

    /// Per-stage throughput and latency percentiles inside the window.
    async fn stage_metrics(&self, since: DateTime<Utc>) -> Result<Vec<StageMetrics>, StoreError>;

    /// End-to-end latency (earliest detection of a track to its executed
    /// effect) for effects executed inside the window.
    async fn latency_summary(&self, since: DateTime<Utc>) -> Result<LatencySummary, StoreError>;

    // --- admin ------------------------------------------------------------

    /// Delete all tracks, detections, proposals, decisions, and effects.
    /// Audit entries, rules, and counters survive. Development only.
    async fn clear_all(&self) -> Result<(), StoreError>;

    /// Cheap liveness probe for `/health`.
    async fn health_check(&self) -> Result<(), StoreError>;
}
