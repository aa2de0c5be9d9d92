use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::error::DatabaseError as _;
use uuid::Uuid;

use sentinel_core::{Position, ThreatLevel, Velocity};
use sentinel_store::metrics::{LatencySummary, MetricsSummary, StageMetrics};
use sentinel_store::{
    AuditQuery, AuditRecord, DecisionQuery, DecisionRecord, DetectionRecord, EffectQuery,
    EffectRecord, InterventionRule, ProposalInsert, ProposalQuery, ProposalRecord, ProposalStatus,
    Store, StoreError, TrackQuery, TrackRecord,
};

use crate::config::PostgresConfig;
use crate::migrations;

/// PostgreSQL-backed implementation of [`Store`].
///
/// Uses `sqlx::PgPool` for connection pooling. The pending-proposal
/// uniqueness lives in a partial unique index; the idempotent effect write is
/// `INSERT .. ON CONFLICT DO NOTHING` on the unique `idempotent_key` column.
pub struct PostgresStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresStore {
    /// Connect, create the pool, and run migrations.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::from_pool(pool, config).await
    }

    /// Wrap an existing pool; runs migrations.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }
}

/// Map a sqlx error, recognizing unique-constraint collisions (SQLSTATE
/// 23505) so callers can treat them as idempotent success.
fn map_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e
        && db.code().as_deref() == Some("23505")
    {
        return StoreError::UniqueViolation(db.message().to_string());
    }
    StoreError::Backend(e.to_string())
}

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Serialization)
}

fn parse_json(value: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_set<T: FromStr<Err = String>>(values: Vec<String>) -> Result<Vec<T>, StoreError> {
    values.iter().map(|v| parse(v)).collect()
}

fn set_to_strings<T: Copy + ToString>(values: &[T]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

type TrackRow = (
    String,
    Option<String>,
    String,
    String,
    f64,
    f64,
    f64,
    f64,
    f64,
    f64,
    Option<String>,
    String,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn track_from_row(row: TrackRow) -> Result<TrackRecord, StoreError> {
    Ok(TrackRecord {
        track_id: row.0,
        external_id: row.1,
        classification: parse(&row.2)?,
        track_type: parse(&row.3)?,
        confidence: row.4,
        position: Position {
            latitude: row.5,
            longitude: row.6,
            altitude: row.7,
        },
        velocity: Velocity {
            speed_mps: row.8,
            heading_deg: row.9,
        },
        threat_level: row.10.as_deref().map(parse::<ThreatLevel>).transpose()?,
        state: row.11,
        detection_count: row.12,
        first_seen: row.13,
        last_updated: row.14,
    })
}

const TRACK_COLUMNS: &str = "track_id, external_id, classification, track_type, confidence, \
     position_lat, position_lon, position_alt, velocity_speed, velocity_heading, \
     threat_level, state, detection_count, first_seen, last_updated";

type ProposalRow = (
    Uuid,
    String,
    String,
    i16,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    DateTime<Utc>,
    i32,
    Option<DateTime<Utc>>,
    Uuid,
    DateTime<Utc>,
);

fn proposal_from_row(row: ProposalRow) -> Result<ProposalRecord, StoreError> {
    Ok(ProposalRecord {
        proposal_id: row.0,
        track_id: row.1,
        action_type: parse(&row.2)?,
        priority: u8::try_from(row.3).map_err(|e| StoreError::Serialization(e.to_string()))?,
        threat_level: parse(&row.4)?,
        rationale: row.5,
        constraints: serde_json::from_str(&row.6)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        track_data: parse_json(&row.7)?,
        policy_decision: row.8.as_deref().map(parse_json).transpose()?,
        status: parse(&row.9)?,
        expires_at: row.10,
        hit_count: row.11,
        last_hit_at: row.12,
        correlation_id: row.13,
        created_at: row.14,
    })
}

const PROPOSAL_COLUMNS: &str = "proposal_id, track_id, action_type, priority, threat_level, \
     rationale, constraints_json, track_data_json, policy_decision_json, status, expires_at, \
     hit_count, last_hit_at, correlation_id, created_at";

type EffectRow = (
    Uuid,
    Uuid,
    Uuid,
    String,
    String,
    String,
    Option<String>,
    String,
    DateTime<Utc>,
    Uuid,
    DateTime<Utc>,
);

fn effect_from_row(row: EffectRow) -> Result<EffectRecord, StoreError> {
    Ok(EffectRecord {
        effect_id: row.0,
        decision_id: row.1,
        proposal_id: row.2,
        track_id: row.3,
        action_type: parse(&row.4)?,
        status: parse(&row.5)?,
        result: row.6,
        idempotent_key: row.7,
        executed_at: row.8,
        correlation_id: row.9,
        created_at: row.10,
    })
}

const EFFECT_COLUMNS: &str = "effect_id, decision_id, proposal_id, track_id, action_type, \
     status, result, idempotent_key, executed_at, correlation_id, created_at";

type DecisionRow = (
    Uuid,
    Uuid,
    bool,
    String,
    DateTime<Utc>,
    String,
    Vec<String>,
    String,
    String,
);

fn decision_from_row(row: DecisionRow) -> Result<DecisionRecord, StoreError> {
    Ok(DecisionRecord {
        decision_id: row.0,
        proposal_id: row.1,
        approved: row.2,
        approved_by: row.3,
        approved_at: row.4,
        reason: row.5,
        conditions: row.6,
        action_type: parse(&row.7)?,
        track_id: row.8,
    })
}

const DECISION_COLUMNS: &str = "decision_id, proposal_id, approved, approved_by, approved_at, \
     reason, conditions, action_type, track_id";

type RuleRow = (
    Uuid,
    String,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Option<i16>,
    Option<i16>,
    bool,
    bool,
    bool,
    i32,
);

fn rule_from_row(row: RuleRow) -> Result<InterventionRule, StoreError> {
    Ok(InterventionRule {
        rule_id: row.0,
        name: row.1,
        action_types: parse_set(row.2)?,
        threat_levels: parse_set(row.3)?,
        classifications: parse_set(row.4)?,
        track_types: parse_set(row.5)?,
        min_priority: row
            .6
            .map(|v| u8::try_from(v).map_err(|e| StoreError::Serialization(e.to_string())))
            .transpose()?,
        max_priority: row
            .7
            .map(|v| u8::try_from(v).map_err(|e| StoreError::Serialization(e.to_string())))
            .transpose()?,
        requires_approval: row.8,
        auto_approve: row.9,
        enabled: row.10,
        evaluation_order: row.11,
    })
}

const RULE_COLUMNS: &str = "rule_id, name, action_types, threat_levels, classifications, \
     track_types, min_priority, max_priority, requires_approval, auto_approve, enabled, \
     evaluation_order";

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_track(&self, track: &TrackRecord) -> Result<(), StoreError> {
        let table = self.config.tracks_table();
        let query = format!(
            "INSERT INTO {table} ({TRACK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (track_id) DO UPDATE SET \
                 external_id = EXCLUDED.external_id, \
                 classification = EXCLUDED.classification, \
                 track_type = EXCLUDED.track_type, \
                 confidence = EXCLUDED.confidence, \
                 position_lat = EXCLUDED.position_lat, \
                 position_lon = EXCLUDED.position_lon, \
                 position_alt = EXCLUDED.position_alt, \
                 velocity_speed = EXCLUDED.velocity_speed, \
                 velocity_heading = EXCLUDED.velocity_heading, \
                 threat_level = EXCLUDED.threat_level, \
                 state = EXCLUDED.state, \
                 detection_count = EXCLUDED.detection_count, \
                 last_updated = EXCLUDED.last_updated"
        );
        sqlx::query(&query)
            .bind(&track.track_id)
            .bind(&track.external_id)
            .bind(track.classification.to_string())
            .bind(track.track_type.to_string())
            .bind(track.confidence)
            .bind(track.position.latitude)
            .bind(track.position.longitude)
            .bind(track.position.altitude)
            .bind(track.velocity.speed_mps)
            .bind(track.velocity.heading_deg)
            .bind(track.threat_level.map(|l| l.to_string()))
            .bind(&track.state)
            .bind(track.detection_count)
            .bind(track.first_seen)
            .bind(track.last_updated)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn get_track(&self, track_id: &str) -> Result<Option<TrackRecord>, StoreError> {
        let table = self.config.tracks_table();
        let query = format!("SELECT {TRACK_COLUMNS} FROM {table} WHERE track_id = $1");
        let row: Option<TrackRow> = sqlx::query_as(&query)
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(track_from_row).transpose()
    }

    async fn list_tracks(&self, query: &TrackQuery) -> Result<Vec<TrackRecord>, StoreError> {
        let table = self.config.tracks_table();
        let sql = format!(
            "SELECT {TRACK_COLUMNS} FROM {table} \
             WHERE ($1::text IS NULL OR classification = $1) \
               AND ($2::text IS NULL OR threat_level = $2) \
               AND ($3::text IS NULL OR track_type = $3) \
               AND ($4::timestamptz IS NULL OR last_updated >= $4) \
             ORDER BY last_updated DESC \
             LIMIT $5 OFFSET $6"
        );
        let rows: Vec<TrackRow> = sqlx::query_as(&sql)
            .bind(query.classification.map(|c| c.to_string()))
            .bind(query.threat_level.map(|l| l.to_string()))
            .bind(query.track_type.map(|t| t.to_string()))
            .bind(query.since)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(track_from_row).collect()
    }

    async fn insert_detection(&self, detection: &DetectionRecord) -> Result<(), StoreError> {
        let table = self.config.detections_table();
        // Redelivered detections are no-ops, matching the at-least-once
        // delivery model upstream.
        let query = format!(
            "INSERT INTO {table} (detection_id, track_id, sensor_id, position_lat, position_lon, \
             position_alt, raw_data, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (detection_id) DO NOTHING"
        );
        sqlx::query(&query)
            .bind(detection.detection_id)
            .bind(&detection.track_id)
            .bind(&detection.sensor_id)
            .bind(detection.position.latitude)
            .bind(detection.position.longitude)
            .bind(detection.position.altitude)
            .bind(to_json(&detection.raw_data)?)
            .bind(detection.created_at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn list_detections(
        &self,
        track_id: &str,
        limit: i64,
    ) -> Result<Vec<DetectionRecord>, StoreError> {
        let table = self.config.detections_table();
        let query = format!(
            "SELECT detection_id, track_id, sensor_id, position_lat, position_lon, position_alt, \
             raw_data, created_at \
             FROM {table} WHERE track_id = $1 ORDER BY created_at DESC LIMIT $2"
        );
        let rows: Vec<(Uuid, String, String, f64, f64, f64, String, DateTime<Utc>)> =
            sqlx::query_as(&query)
                .bind(track_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)?;
        rows.into_iter()
            .map(|r| {
                Ok(DetectionRecord {
                    detection_id: r.0,
                    track_id: r.1,
                    sensor_id: r.2,
                    position: Position {
                        latitude: r.3,
                        longitude: r.4,
                        altitude: r.5,
                    },
                    raw_data: parse_json(&r.6)?,
                    created_at: r.7,
                })
            })
            .collect()
    }

    async fn insert_pending_proposal(
        &self,
        proposal: &ProposalRecord,
    ) -> Result<ProposalInsert, StoreError> {
        let table = self.config.proposals_table();
        let insert = format!(
            "INSERT INTO {table} ({PROPOSAL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (track_id) WHERE status = 'pending' DO NOTHING"
        );
        let merge = format!(
            "UPDATE {table} SET \
                 hit_count = hit_count + 1, \
                 last_hit_at = NOW(), \
                 priority = GREATEST(priority, $2) \
             WHERE track_id = $1 AND status = 'pending' \
             RETURNING {PROPOSAL_COLUMNS}"
        );

        // Two attempts cover the race where the existing pending row turns
        // terminal between the failed insert and the merge update.
        for _ in 0..2 {
            let result = sqlx::query(&insert)
                .bind(proposal.proposal_id)
                .bind(&proposal.track_id)
                .bind(proposal.action_type.to_string())
                .bind(i16::from(proposal.priority))
                .bind(proposal.threat_level.to_string())
                .bind(&proposal.rationale)
                .bind(to_json(&proposal.constraints)?)
                .bind(to_json(&proposal.track_data)?)
                .bind(
                    proposal
                        .policy_decision
                        .as_ref()
                        .map(to_json)
                        .transpose()?,
                )
                .bind(proposal.status.to_string())
                .bind(proposal.expires_at)
                .bind(proposal.hit_count)
                .bind(proposal.last_hit_at)
                .bind(proposal.correlation_id)
                .bind(proposal.created_at)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;

            if result.rows_affected() > 0 {
                return Ok(ProposalInsert::Inserted);
            }

            let merged: Option<ProposalRow> = sqlx::query_as(&merge)
                .bind(&proposal.track_id)
                .bind(i16::from(proposal.priority))
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
            if let Some(row) = merged {
                return Ok(ProposalInsert::Merged(proposal_from_row(row)?));
            }
        }
        Err(StoreError::Backend(
            "pending proposal upsert raced with a concurrent transition".into(),
        ))
    }

    async fn get_proposal(&self, proposal_id: Uuid) -> Result<Option<ProposalRecord>, StoreError> {
        let table = self.config.proposals_table();
        let query = format!("SELECT {PROPOSAL_COLUMNS} FROM {table} WHERE proposal_id = $1");
        let row: Option<ProposalRow> = sqlx::query_as(&query)
            .bind(proposal_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(proposal_from_row).transpose()
    }

    async fn list_proposals(
        &self,
        query: &ProposalQuery,
    ) -> Result<Vec<ProposalRecord>, StoreError> {
        let table = self.config.proposals_table();
        let sql = format!(
            "SELECT {PROPOSAL_COLUMNS} FROM {table} \
             WHERE ($1::text IS NULL OR status = $1) \
               AND ($2::text IS NULL OR track_id = $2) \
               AND ($3::text IS NULL OR action_type = $3) \
               AND ($4::text IS NULL OR threat_level = $4) \
             ORDER BY created_at DESC \
             LIMIT $5 OFFSET $6"
        );
        let rows: Vec<ProposalRow> = sqlx::query_as(&sql)
            .bind(query.status.map(|s| s.to_string()))
            .bind(query.track_id.clone())
            .bind(query.action_type.map(|a| a.to_string()))
            .bind(query.threat_level.map(|l| l.to_string()))
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(proposal_from_row).collect()
    }

    async fn transition_proposal(
        &self,
        proposal_id: Uuid,
        to: ProposalStatus,
    ) -> Result<bool, StoreError> {
        let table = self.config.proposals_table();
        let query =
            format!("UPDATE {table} SET status = $2 WHERE proposal_id = $1 AND status = 'pending'");
        let result = sqlx::query(&query)
            .bind(proposal_id)
            .bind(to.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_decision(&self, decision: &DecisionRecord) -> Result<(), StoreError> {
        let table = self.config.decisions_table();
        let query = format!(
            "INSERT INTO {table} ({DECISION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&query)
            .bind(decision.decision_id)
            .bind(decision.proposal_id)
            .bind(decision.approved)
            .bind(&decision.approved_by)
            .bind(decision.approved_at)
            .bind(&decision.reason)
            .bind(&decision.conditions)
            .bind(decision.action_type.to_string())
            .bind(&decision.track_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn get_decision(&self, decision_id: Uuid) -> Result<Option<DecisionRecord>, StoreError> {
        let table = self.config.decisions_table();
        let query = format!("SELECT {DECISION_COLUMNS} FROM {table} WHERE decision_id = $1");
        let row: Option<DecisionRow> = sqlx::query_as(&query)
            .bind(decision_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(decision_from_row).transpose()
    }

    async fn list_decisions(
        &self,
        query: &DecisionQuery,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        let table = self.config.decisions_table();
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM {table} \
             WHERE ($1::boolean IS NULL OR approved = $1) \
               AND ($2::text IS NULL OR approved_by = $2) \
               AND ($3::timestamptz IS NULL OR approved_at >= $3) \
             ORDER BY approved_at DESC \
             LIMIT $4 OFFSET $5"
        );
        let rows: Vec<DecisionRow> = sqlx::query_as(&sql)
            .bind(query.approved)
            .bind(query.approved_by.clone())
            .bind(query.since)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(decision_from_row).collect()
    }

    async fn insert_effect(&self, effect: &EffectRecord) -> Result<bool, StoreError> {
        let table = self.config.effects_table();
        let query = format!(
            "INSERT INTO {table} ({EFFECT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (idempotent_key) DO NOTHING"
        );
        let result = sqlx::query(&query)
            .bind(effect.effect_id)
            .bind(effect.decision_id)
            .bind(effect.proposal_id)
            .bind(&effect.track_id)
            .bind(effect.action_type.to_string())
            .bind(effect.status.to_string())
            .bind(&effect.result)
            .bind(&effect.idempotent_key)
            .bind(effect.executed_at)
            .bind(effect.correlation_id)
            .bind(effect.created_at)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_effect_by_key(
        &self,
        idempotent_key: &str,
    ) -> Result<Option<EffectRecord>, StoreError> {
        let table = self.config.effects_table();
        let query = format!("SELECT {EFFECT_COLUMNS} FROM {table} WHERE idempotent_key = $1");
        let row: Option<EffectRow> = sqlx::query_as(&query)
            .bind(idempotent_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(effect_from_row).transpose()
    }

    async fn list_effects(&self, query: &EffectQuery) -> Result<Vec<EffectRecord>, StoreError> {
        let table = self.config.effects_table();
        let sql = format!(
            "SELECT {EFFECT_COLUMNS} FROM {table} \
             WHERE ($1::text IS NULL OR status = $1) \
               AND ($2::text IS NULL OR action_type = $2) \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
             ORDER BY created_at DESC \
             LIMIT $4 OFFSET $5"
        );
        let rows: Vec<EffectRow> = sqlx::query_as(&sql)
            .bind(query.status.map(|s| s.to_string()))
            .bind(query.action_type.map(|a| a.to_string()))
            .bind(query.since)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(effect_from_row).collect()
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let table = self.config.audit_table();
        let query = format!(
            "INSERT INTO {table} (timestamp, entity_type, entity_id, action, actor_id, \
             old_value_json, new_value_json, correlation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&query)
            .bind(record.timestamp)
            .bind(&record.entity_type)
            .bind(&record.entity_id)
            .bind(&record.action)
            .bind(&record.actor_id)
            .bind(record.old_value.as_ref().map(to_json).transpose()?)
            .bind(record.new_value.as_ref().map(to_json).transpose()?)
            .bind(record.correlation_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let table = self.config.audit_table();
        let sql = format!(
            "SELECT id, timestamp, entity_type, entity_id, action, actor_id, old_value_json, \
             new_value_json, correlation_id \
             FROM {table} \
             WHERE ($1::text IS NULL OR action = $1) \
               AND ($2::text IS NULL OR actor_id = $2) \
               AND ($3::text IS NULL OR entity_id = $3) \
             ORDER BY timestamp DESC \
             LIMIT $4"
        );
        #[allow(clippy::type_complexity)]
        let rows: Vec<(
            i64,
            DateTime<Utc>,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<Uuid>,
        )> = sqlx::query_as(&sql)
            .bind(query.action.clone())
            .bind(query.actor_id.clone())
            .bind(query.entity_id.clone())
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter()
            .map(|r| {
                Ok(AuditRecord {
                    id: r.0,
                    timestamp: r.1,
                    entity_type: r.2,
                    entity_id: r.3,
                    action: r.4,
                    actor_id: r.5,
                    old_value: r.6.as_deref().map(parse_json).transpose()?,
                    new_value: r.7.as_deref().map(parse_json).transpose()?,
                    correlation_id: r.8,
                })
            })
            .collect()
    }

    async fn list_rules(&self, enabled_only: bool) -> Result<Vec<InterventionRule>, StoreError> {
        let table = self.config.rules_table();
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM {table} \
             WHERE ($1::boolean = FALSE OR enabled) \
             ORDER BY evaluation_order ASC"
        );
        let rows: Vec<RuleRow> = sqlx::query_as(&sql)
            .bind(enabled_only)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(rule_from_row).collect()
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<InterventionRule>, StoreError> {
        let table = self.config.rules_table();
        let query = format!("SELECT {RULE_COLUMNS} FROM {table} WHERE rule_id = $1");
        let row: Option<RuleRow> = sqlx::query_as(&query)
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(rule_from_row).transpose()
    }

    async fn upsert_rule(&self, rule: &InterventionRule) -> Result<(), StoreError> {
        let table = self.config.rules_table();
        let query = format!(
            "INSERT INTO {table} ({RULE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (rule_id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 action_types = EXCLUDED.action_types, \
                 threat_levels = EXCLUDED.threat_levels, \
                 classifications = EXCLUDED.classifications, \
                 track_types = EXCLUDED.track_types, \
                 min_priority = EXCLUDED.min_priority, \
                 max_priority = EXCLUDED.max_priority, \
                 requires_approval = EXCLUDED.requires_approval, \
                 auto_approve = EXCLUDED.auto_approve, \
                 enabled = EXCLUDED.enabled, \
                 evaluation_order = EXCLUDED.evaluation_order"
        );
        sqlx::query(&query)
            .bind(rule.rule_id)
            .bind(&rule.name)
            .bind(set_to_strings(&rule.action_types))
            .bind(set_to_strings(&rule.threat_levels))
            .bind(set_to_strings(&rule.classifications))
            .bind(set_to_strings(&rule.track_types))
            .bind(rule.min_priority.map(i16::from))
            .bind(rule.max_priority.map(i16::from))
            .bind(rule.requires_approval)
            .bind(rule.auto_approve)
            .bind(rule.enabled)
            .bind(rule.evaluation_order)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<bool, StoreError> {
        let table = self.config.rules_table();
        let query = format!("DELETE FROM {table} WHERE rule_id = $1");
        let result = sqlx::query(&query)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_counter(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let table = self.config.counters_table();
        let query = format!(
            "INSERT INTO {table} (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = {table}.value + $2 \
             RETURNING value"
        );
        let row: (i64,) = sqlx::query_as(&query)
            .bind(key)
            .bind(delta)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.0)
    }

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        let table = self.config.counters_table();
        let query = format!("SELECT value FROM {table} WHERE key = $1");
        let row: Option<(i64,)> = sqlx::query_as(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.map_or(0, |(v,)| v))
    }

    async fn metrics_summary(&self, since: DateTime<Utc>) -> Result<MetricsSummary, StoreError> {
        let tracks = self.config.tracks_table();
        let detections = self.config.detections_table();
        let proposals = self.config.proposals_table();
        let decisions = self.config.decisions_table();
        let effects = self.config.effects_table();
        let counters = self.config.counters_table();

        let sql = format!(
            "SELECT \
               (SELECT COUNT(*) FROM {tracks} WHERE last_updated >= $1), \
               (SELECT COUNT(*) FROM {detections}), \
               (SELECT COUNT(*) FROM {proposals} WHERE status = 'pending'), \
               (SELECT COUNT(*) FROM {proposals} WHERE status = 'approved'), \
               (SELECT COUNT(*) FROM {proposals} WHERE status = 'denied'), \
               (SELECT COUNT(*) FROM {proposals} WHERE status = 'expired'), \
               (SELECT COUNT(*) FROM {decisions}), \
               (SELECT COUNT(*) FROM {effects} WHERE status IN ('executed', 'simulated')), \
               (SELECT COUNT(*) FROM {effects} WHERE status = 'failed')"
        );
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(&sql)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;

        let counter_rows: Vec<(String, i64)> =
            sqlx::query_as(&format!("SELECT key, value FROM {counters}"))
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)?;

        Ok(MetricsSummary {
            active_tracks: row.0,
            detections: row.1,
            proposals_pending: row.2,
            proposals_approved: row.3,
            proposals_denied: row.4,
            proposals_expired: row.5,
            decisions: row.6,
            effects_executed: row.7,
            effects_failed: row.8,
            counters: counter_rows.into_iter().collect(),
        })
    }

    async fn stage_metrics(&self, since: DateTime<Utc>) -> Result<Vec<StageMetrics>, StoreError> {
        let tracks = self.config.tracks_table();
        let detections = self.config.detections_table();
        let proposals = self.config.proposals_table();
        let decisions = self.config.decisions_table();
        let effects = self.config.effects_table();

        let counts_sql = format!(
            "SELECT \
               (SELECT COUNT(*) FROM {detections} WHERE created_at >= $1), \
               (SELECT COUNT(*) FROM {tracks} WHERE last_updated >= $1), \
               (SELECT COUNT(*) FROM {proposals} WHERE created_at >= $1), \
               (SELECT COUNT(*) FROM {decisions} WHERE approved_at >= $1), \
               (SELECT COUNT(*) FROM {effects} WHERE created_at >= $1)"
        );
        let counts: (i64, i64, i64, i64, i64) = sqlx::query_as(&counts_sql)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;

        let decision_latency_sql = format!(
            "SELECT \
               (percentile_cont(0.5) WITHIN GROUP (ORDER BY lat))::double precision, \
               (percentile_cont(0.95) WITHIN GROUP (ORDER BY lat))::double precision, \
               (percentile_cont(0.99) WITHIN GROUP (ORDER BY lat))::double precision \
             FROM (SELECT (EXTRACT(EPOCH FROM (d.approved_at - p.created_at)) * 1000)::double precision AS lat \
                   FROM {decisions} d JOIN {proposals} p ON p.proposal_id = d.proposal_id \
                   WHERE d.approved_at >= $1) s"
        );
        let decision_lat: (Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(&decision_latency_sql)
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;

        let effect_latency_sql = format!(
            "SELECT \
               (percentile_cont(0.5) WITHIN GROUP (ORDER BY lat))::double precision, \
               (percentile_cont(0.95) WITHIN GROUP (ORDER BY lat))::double precision, \
               (percentile_cont(0.99) WITHIN GROUP (ORDER BY lat))::double precision \
             FROM (SELECT (EXTRACT(EPOCH FROM (e.executed_at - d.approved_at)) * 1000)::double precision AS lat \
                   FROM {effects} e JOIN {decisions} d ON d.decision_id = e.decision_id \
                   WHERE e.created_at >= $1) s"
        );
        let effect_lat: (Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(&effect_latency_sql)
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;

        let stage = |name: &str, processed: i64, lat: (Option<f64>, Option<f64>, Option<f64>)| {
            StageMetrics {
                stage: name.to_string(),
                processed,
                p50_ms: lat.0,
                p95_ms: lat.1,
                p99_ms: lat.2,
            }
        };
        Ok(vec![
            stage("detect", counts.0, (None, None, None)),
            stage("track", counts.1, (None, None, None)),
            stage("proposal", counts.2, (None, None, None)),
            stage("decision", counts.3, decision_lat),
            stage("effect", counts.4, effect_lat),
        ])
    }

    async fn latency_summary(&self, since: DateTime<Utc>) -> Result<LatencySummary, StoreError> {
        let detections = self.config.detections_table();
        let effects = self.config.effects_table();
        let sql = format!(
            "SELECT COUNT(*), \
               AVG(lat)::double precision, \
               (percentile_cont(0.5) WITHIN GROUP (ORDER BY lat))::double precision, \
               (percentile_cont(0.95) WITHIN GROUP (ORDER BY lat))::double precision, \
               (percentile_cont(0.99) WITHIN GROUP (ORDER BY lat))::double precision, \
               MAX(lat)::double precision \
             FROM (SELECT (EXTRACT(EPOCH FROM (e.executed_at - fd.first_at)) * 1000)::double precision AS lat \
                   FROM {effects} e \
                   JOIN (SELECT track_id, MIN(created_at) AS first_at FROM {detections} GROUP BY track_id) fd \
                     ON fd.track_id = e.track_id \
                   WHERE e.executed_at >= $1 AND e.status IN ('executed', 'simulated')) s"
        );
        #[allow(clippy::type_complexity)]
        let row: (
            i64,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        ) = sqlx::query_as(&sql)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(LatencySummary {
            samples: row.0,
            mean_ms: row.1,
            p50_ms: row.2,
            p95_ms: row.3,
            p99_ms: row.4,
            max_ms: row.5,
        })
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        for table in [
            self.config.tracks_table(),
            self.config.detections_table(),
            self.config.proposals_table(),
            self.config.decisions_table(),
            self.config.effects_table(),
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/sentinel_test".to_string()),
            table_prefix: format!("test_{}_", Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let store = PostgresStore::new(test_config())
            .await
            .expect("pool creation should succeed");
        sentinel_store::testing::run_store_conformance(&store)
            .await
            .expect("conformance tests should pass");
    }
}
