//! Idempotent schema creation, run once at pool creation.

use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Create all tables and indexes if they do not exist.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let tracks = config.tracks_table();
    let detections = config.detections_table();
    let proposals = config.proposals_table();
    let decisions = config.decisions_table();
    let effects = config.effects_table();
    let audit = config.audit_table();
    let rules = config.rules_table();
    let counters = config.counters_table();
    let prefix = &config.table_prefix;

    let statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {tracks} (
                track_id TEXT PRIMARY KEY,
                external_id TEXT,
                classification TEXT NOT NULL,
                track_type TEXT NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                position_lat DOUBLE PRECISION NOT NULL,
                position_lon DOUBLE PRECISION NOT NULL,
                position_alt DOUBLE PRECISION NOT NULL,
                velocity_speed DOUBLE PRECISION NOT NULL,
                velocity_heading DOUBLE PRECISION NOT NULL,
                threat_level TEXT,
                state TEXT NOT NULL,
                detection_count BIGINT NOT NULL,
                first_seen TIMESTAMPTZ NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {prefix}tracks_last_updated_idx
             ON {tracks} (last_updated DESC)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {detections} (
                detection_id UUID PRIMARY KEY,
                track_id TEXT NOT NULL,
                sensor_id TEXT NOT NULL,
                position_lat DOUBLE PRECISION NOT NULL,
                position_lon DOUBLE PRECISION NOT NULL,
                position_alt DOUBLE PRECISION NOT NULL,
                raw_data TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {prefix}detections_track_idx
             ON {detections} (track_id, created_at DESC)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {proposals} (
                proposal_id UUID PRIMARY KEY,
                track_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                priority SMALLINT NOT NULL,
                threat_level TEXT NOT NULL,
                rationale TEXT NOT NULL,
                constraints_json TEXT NOT NULL,
                track_data_json TEXT NOT NULL,
                policy_decision_json TEXT,
                status TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                hit_count INTEGER NOT NULL,
                last_hit_at TIMESTAMPTZ,
                correlation_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"
        ),
        // At most one pending proposal per track at any instant.
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {prefix}proposals_pending_track_idx
             ON {proposals} (track_id) WHERE status = 'pending'"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {prefix}proposals_status_idx
             ON {proposals} (status, created_at DESC)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {decisions} (
                decision_id UUID PRIMARY KEY,
                proposal_id UUID NOT NULL,
                approved BOOLEAN NOT NULL,
                approved_by TEXT NOT NULL,
                approved_at TIMESTAMPTZ NOT NULL,
                reason TEXT NOT NULL,
                conditions TEXT[] NOT NULL DEFAULT '{{}}',
                action_type TEXT NOT NULL,
                track_id TEXT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {effects} (
                effect_id UUID PRIMARY KEY,
                decision_id UUID NOT NULL,
                proposal_id UUID NOT NULL,
                track_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                idempotent_key TEXT NOT NULL UNIQUE,
                executed_at TIMESTAMPTZ NOT NULL,
                correlation_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {audit} (
                id BIGSERIAL PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                old_value_json TEXT,
                new_value_json TEXT,
                correlation_id UUID
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {rules} (
                rule_id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                action_types TEXT[] NOT NULL DEFAULT '{{}}',
                threat_levels TEXT[] NOT NULL DEFAULT '{{}}',
                classifications TEXT[] NOT NULL DEFAULT '{{}}',
                track_types TEXT[] NOT NULL DEFAULT '{{}}',
                min_priority SMALLINT,
                max_priority SMALLINT,
                requires_approval BOOLEAN NOT NULL,
                auto_approve BOOLEAN NOT NULL,
                enabled BOOLEAN NOT NULL,
                evaluation_order INTEGER NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {counters} (
                key TEXT PRIMARY KEY,
                value BIGINT NOT NULL
            )"
        ),
    ];

    for statement in statements {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}
