//! In-process [`Store`] backend with the same observable semantics as the
//! PostgreSQL backend, including the pending-proposal partial uniqueness and
//! the idempotent effect write.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use sentinel_core::EffectStatus;
use sentinel_store::metrics::percentile;
use sentinel_store::{
    AuditQuery, AuditRecord, DecisionQuery, DecisionRecord, DetectionRecord, EffectQuery,
    EffectRecord, InterventionRule, LatencySummary, MetricsSummary, ProposalInsert, ProposalQuery,
    ProposalRecord, ProposalStatus, StageMetrics, Store, StoreError, TrackQuery, TrackRecord,
};

#[derive(Default)]
struct Inner {
    tracks: BTreeMap<String, TrackRecord>,
    detections: Vec<DetectionRecord>,
    proposals: BTreeMap<Uuid, ProposalRecord>,
    decisions: BTreeMap<Uuid, DecisionRecord>,
    effects: Vec<EffectRecord>,
    audit: Vec<AuditRecord>,
    next_audit_id: i64,
    rules: BTreeMap<Uuid, InterventionRule>,
    counters: BTreeMap<String, i64>,
}

/// In-memory store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn latency_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let micros = (to - from).num_microseconds().unwrap_or(0) as f64;
    micros / 1_000.0
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_track(&self, track: &TrackRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let mut row = track.clone();
        if let Some(existing) = inner.tracks.get(&track.track_id) {
            row.first_seen = existing.first_seen;
        }
        inner.tracks.insert(track.track_id.clone(), row);
        Ok(())
    }

    async fn get_track(&self, track_id: &str) -> Result<Option<TrackRecord>, StoreError> {
        Ok(self.inner.lock().tracks.get(track_id).cloned())
    }

    async fn list_tracks(&self, query: &TrackQuery) -> Result<Vec<TrackRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<TrackRecord> = inner
            .tracks
            .values()
            .filter(|t| {
                query
                    .classification
                    .is_none_or(|c| t.classification == c)
                    && query.threat_level.is_none_or(|l| t.threat_level == Some(l))
                    && query.track_type.is_none_or(|ty| t.track_type == ty)
                    && query.since.is_none_or(|s| t.last_updated >= s)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(page(rows, query.offset, query.limit))
    }

    async fn insert_detection(&self, detection: &DetectionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        // Redelivered detections are no-ops.
        if inner
            .detections
            .iter()
            .any(|d| d.detection_id == detection.detection_id)
        {
            return Ok(());
        }
        inner.detections.push(detection.clone());
        Ok(())
    }

    async fn list_detections(
        &self,
        track_id: &str,
        limit: i64,
    ) -> Result<Vec<DetectionRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<DetectionRecord> = inner
            .detections
            .iter()
            .filter(|d| d.track_id == track_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, 0, limit))
    }

    async fn insert_pending_proposal(
        &self,
        proposal: &ProposalRecord,
    ) -> Result<ProposalInsert, StoreError> {
        let mut inner = self.inner.lock();
        let existing_id = inner
            .proposals
            .values()
            .find(|p| p.status == ProposalStatus::Pending && p.track_id == proposal.track_id)
            .map(|p| p.proposal_id);

        if let Some(id) = existing_id {
            let row = inner
                .proposals
                .get_mut(&id)
                .ok_or_else(|| StoreError::Backend("pending row vanished".into()))?;
            row.hit_count += 1;
            row.last_hit_at = Some(Utc::now());
            row.priority = row.priority.max(proposal.priority);
            return Ok(ProposalInsert::Merged(row.clone()));
        }

        inner
            .proposals
            .insert(proposal.proposal_id, proposal.clone());
        Ok(ProposalInsert::Inserted)
    }

    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<ProposalRecord>, StoreError> {
        Ok(self.inner.lock().proposals.get(&proposal_id).cloned())
    }

    async fn list_proposals(
        &self,
        query: &ProposalQuery,
    ) -> Result<Vec<ProposalRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<ProposalRecord> = inner
            .proposals
            .values()
            .filter(|p| {
                query.status.is_none_or(|s| p.status == s)
                    && query
                        .track_id
                        .as_deref()
                        .is_none_or(|id| p.track_id == id)
                    && query.action_type.is_none_or(|a| p.action_type == a)
                    && query.threat_level.is_none_or(|l| p.threat_level == l)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, query.offset, query.limit))
    }

    async fn transition_proposal(
        &self,
        proposal_id: Uuid,
        to: ProposalStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.proposals.get_mut(&proposal_id) {
            Some(row) if row.status == ProposalStatus::Pending => {
                row.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_decision(&self, decision: &DecisionRecord) -> Result<(), StoreError> {
        self.inner
            .lock()
            .decisions
            .insert(decision.decision_id, decision.clone());
        Ok(())
    }

    async fn get_decision(&self, decision_id: Uuid) -> Result<Option<DecisionRecord>, StoreError> {
        Ok(self.inner.lock().decisions.get(&decision_id).cloned())
    }

    async fn list_decisions(
        &self,
        query: &DecisionQuery,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<DecisionRecord> = inner
            .decisions
            .values()
            .filter(|d| {
                query.approved.is_none_or(|a| d.approved == a)
                    && query
                        .approved_by
                        .as_deref()
                        .is_none_or(|by| d.approved_by == by)
                    && query.since.is_none_or(|s| d.approved_at >= s)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.approved_at.cmp(&a.approved_at));
        Ok(page(rows, query.offset, query.limit))
    }

    async fn insert_effect(&self, effect: &EffectRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner
            .effects
            .iter()
            .any(|e| e.idempotent_key == effect.idempotent_key)
        {
            return Ok(false);
        }
        inner.effects.push(effect.clone());
        Ok(true)
    }

    async fn get_effect_by_key(
        &self,
        idempotent_key: &str,
    ) -> Result<Option<EffectRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .effects
            .iter()
            .find(|e| e.idempotent_key == idempotent_key)
            .cloned())
    }

    async fn list_effects(&self, query: &EffectQuery) -> Result<Vec<EffectRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<EffectRecord> = inner
            .effects
            .iter()
            .filter(|e| {
                query.status.is_none_or(|s| e.status == s)
                    && query.action_type.is_none_or(|a| e.action_type == a)
                    && query.since.is_none_or(|s| e.created_at >= s)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, query.offset, query.limit))
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.next_audit_id += 1;
        let mut row = record.clone();
        row.id = inner.next_audit_id;
        inner.audit.push(row);
        Ok(())
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<AuditRecord> = inner
            .audit
            .iter()
            .filter(|a| {
                query.action.as_deref().is_none_or(|x| a.action == x)
                    && query.actor_id.as_deref().is_none_or(|x| a.actor_id == x)
                    && query.entity_id.as_deref().is_none_or(|x| a.entity_id == x)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(page(rows, 0, query.limit))
    }

    async fn list_rules(&self, enabled_only: bool) -> Result<Vec<InterventionRule>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<InterventionRule> = inner
            .rules
            .values()
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.evaluation_order);
        Ok(rows)
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<InterventionRule>, StoreError> {
        Ok(self.inner.lock().rules.get(&rule_id).cloned())
    }

    async fn upsert_rule(&self, rule: &InterventionRule) -> Result<(), StoreError> {
        self.inner.lock().rules.insert(rule.rule_id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.lock().rules.remove(&rule_id).is_some())
    }

    async fn increment_counter(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        let value = inner.counters.entry(key.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.inner.lock().counters.get(key).copied().unwrap_or(0))
    }

    async fn metrics_summary(&self, since: DateTime<Utc>) -> Result<MetricsSummary, StoreError> {
        let inner = self.inner.lock();
        let count_status = |status: ProposalStatus| {
            i64::try_from(
                inner
                    .proposals
                    .values()
                    .filter(|p| p.status == status)
                    .count(),
            )
            .unwrap_or(i64::MAX)
        };
        Ok(MetricsSummary {
            active_tracks: i64::try_from(
                inner
                    .tracks
                    .values()
                    .filter(|t| t.last_updated >= since)
                    .count(),
            )
            .unwrap_or(i64::MAX),
            detections: i64::try_from(inner.detections.len()).unwrap_or(i64::MAX),
            proposals_pending: count_status(ProposalStatus::Pending),
            proposals_approved: count_status(ProposalStatus::Approved),
            proposals_denied: count_status(ProposalStatus::Denied),
            proposals_expired: count_status(ProposalStatus::Expired),
            decisions: i64::try_from(inner.decisions.len()).unwrap_or(i64::MAX),
            effects_executed: i64::try_from(
                inner
                    .effects
                    .iter()
                    .filter(|e| {
                        matches!(e.status, EffectStatus::Executed | EffectStatus::Simulated)
                    })
                    .count(),
            )
            .unwrap_or(i64::MAX),
            effects_failed: i64::try_from(
                inner
                    .effects
                    .iter()
                    .filter(|e| e.status == EffectStatus::Failed)
                    .count(),
            )
            .unwrap_or(i64::MAX),
            counters: inner.counters.clone(),
        })
    }

    async fn stage_metrics(&self, since: DateTime<Utc>) -> Result<Vec<StageMetrics>, StoreError> {
        let inner = self.inner.lock();

        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);

        // Adjudication latency: proposal creation to decision.
        let decision_latencies: Vec<f64> = inner
            .decisions
            .values()
            .filter(|d| d.approved_at >= since)
            .filter_map(|d| {
                inner
                    .proposals
                    .get(&d.proposal_id)
                    .map(|p| latency_ms(p.created_at, d.approved_at))
            })
            .collect();

        // Execution latency: decision to effect.
        let effect_latencies: Vec<f64> = inner
            .effects
            .iter()
            .filter(|e| e.created_at >= since)
            .filter_map(|e| {
                inner
                    .decisions
                    .get(&e.decision_id)
                    .map(|d| latency_ms(d.approved_at, e.executed_at))
            })
            .collect();

        let stage = |name: &str, processed: i64, latencies: &[f64]| StageMetrics {
            stage: name.to_string(),
            processed,
            p50_ms: percentile(latencies, 50.0),
            p95_ms: percentile(latencies, 95.0),
            p99_ms: percentile(latencies, 99.0),
        };

        Ok(vec![
            stage(
                "detect",
                count(
                    inner
                        .detections
                        .iter()
                        .filter(|d| d.created_at >= since)
                        .count(),
                ),
                &[],
            ),
            stage(
                "track",
                count(
                    inner
                        .tracks
                        .values()
                        .filter(|t| t.last_updated >= since)
                        .count(),
                ),
                &[],
            ),
            stage(
                "proposal",
                count(
                    inner
                        .proposals
                        .values()
                        .filter(|p| p.created_at >= since)
                        .count(),
                ),
                &[],
            ),
            stage(
                "decision",
                count(
                    inner
                        .decisions
                        .values()
                        .filter(|d| d.approved_at >= since)
                        .count(),
                ),
                &decision_latencies,
            ),
            stage(
                "effect",
                count(
                    inner
                        .effects
                        .iter()
                        .filter(|e| e.created_at >= since)
                        .count(),
                ),
                &effect_latencies,
            ),
        ])
    }

    async fn latency_summary(&self, since: DateTime<Utc>) -> Result<LatencySummary, StoreError> {
        let inner = self.inner.lock();
        let samples: Vec<f64> = inner
            .effects
            .iter()
            .filter(|e| {
                e.executed_at >= since
                    && matches!(e.status, EffectStatus::Executed | EffectStatus::Simulated)
            })
            .filter_map(|e| {
                inner
                    .detections
                    .iter()
                    .filter(|d| d.track_id == e.track_id)
                    .map(|d| d.created_at)
                    .min()
                    .map(|first| latency_ms(first, e.executed_at))
            })
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let mean = if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        };
        Ok(LatencySummary {
            samples: i64::try_from(samples.len()).unwrap_or(i64::MAX),
            mean_ms: mean,
            p50_ms: percentile(&samples, 50.0),
            p95_ms: percentile(&samples, 95.0),
            p99_ms: percentile(&samples, 99.0),
            max_ms: samples.iter().copied().fold(None, |acc: Option<f64>, s| {
                Some(acc.map_or(s, |a| a.max(s)))
            }),
        })
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.tracks.clear();
        inner.detections.clear();
        inner.proposals.clear();
        inner.decisions.clear();
        inner.effects.clear();
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Apply offset/limit to a sorted row set.
fn page<T>(rows: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    let offset = usize::try_from(offset.max(0)).unwrap_or(0);
    let limit = usize::try_from(limit.max(0)).unwrap_or(0);
    rows.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conformance() {
        let store = MemoryStore::new();
        sentinel_store::testing::run_store_conformance(&store)
            .await
            .expect("conformance suite");
    }

    #[tokio::test]
    async fn upsert_preserves_first_seen() {
        let store = MemoryStore::new();
        let mut t = sentinel_store::TrackRecord {
            track_id: "H-1".into(),
            external_id: None,
            classification: sentinel_core::Classification::Hostile,
            track_type: sentinel_core::TrackType::Aircraft,
            confidence: 0.5,
            position: sentinel_core::Position {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 0.0,
            },
            velocity: sentinel_core::Velocity {
                speed_mps: 0.0,
                heading_deg: 0.0,
            },
            threat_level: None,
            state: "active".into(),
            detection_count: 1,
            first_seen: Utc::now() - chrono::Duration::seconds(30),
            last_updated: Utc::now(),
        };
        let original_first_seen = t.first_seen;
        store.upsert_track(&t).await.unwrap();

        t.first_seen = Utc::now();
        t.detection_count = 2;
        store.upsert_track(&t).await.unwrap();

        let row = store.get_track("H-1").await.unwrap().unwrap();
        assert_eq!(row.first_seen, original_first_seen);
        assert_eq!(row.detection_count, 2);
    }
}
