//! Conformance suite run against every store backend. Panics on the first
//! violated expectation.

use chrono::{Duration, Utc};
use uuid::Uuid;

use sentinel_core::{
    ActionType, Classification, EffectStatus, Position, ThreatLevel, TrackType, Velocity,
};

use crate::error::StoreError;
use crate::query::{AuditQuery, EffectQuery, ProposalQuery, TrackQuery};
use crate::records::{
    AuditRecord, DecisionRecord, DetectionRecord, EffectRecord, InterventionRule, ProposalRecord,
    ProposalStatus, TrackRecord,
};
use crate::store::{ProposalInsert, Store};

fn track(track_id: &str) -> TrackRecord {
    TrackRecord {
        track_id: track_id.to_string(),
        external_id: None,
        classification: Classification::Hostile,
        track_type: TrackType::Aircraft,
        confidence: 0.8,
        position: Position {
            latitude: 35.0,
            longitude: 139.0,
            altitude: 9000.0,
        },
        velocity: Velocity {
            speed_mps: 250.0,
            heading_deg: 90.0,
        },
        threat_level: Some(ThreatLevel::High),
        state: "active".into(),
        detection_count: 1,
        first_seen: Utc::now(),
        last_updated: Utc::now(),
    }
}

fn proposal(track_id: &str, priority: u8) -> ProposalRecord {
    ProposalRecord {
        proposal_id: Uuid::new_v4(),
        track_id: track_id.to_string(),
        action_type: ActionType::Intercept,
        priority,
        threat_level: ThreatLevel::High,
        rationale: "hostile aircraft at speed".into(),
        constraints: vec!["visual identification first".into()],
        track_data: serde_json::json!({"track_id": track_id}),
        policy_decision: None,
        status: ProposalStatus::Pending,
        expires_at: Utc::now() + Duration::minutes(10),
        hit_count: 1,
        last_hit_at: None,
        correlation_id: Uuid::new_v4(),
        created_at: Utc::now(),
    }
}

fn effect(key: &str) -> EffectRecord {
    EffectRecord {
        effect_id: Uuid::new_v4(),
        decision_id: Uuid::new_v4(),
        proposal_id: Uuid::new_v4(),
        track_id: "H-TRK-0001".into(),
        action_type: ActionType::Engage,
        status: EffectStatus::Executed,
        result: Some("simulated engagement".into()),
        idempotent_key: key.to_string(),
        executed_at: Utc::now(),
        correlation_id: Uuid::new_v4(),
        created_at: Utc::now(),
    }
}

/// Exercise tracks, proposals, decisions, effects, audit, rules, counters,
/// aggregates, and `clear_all` against `store`.
#[allow(clippy::too_many_lines)]
pub async fn run_store_conformance(store: &dyn Store) -> Result<(), StoreError> {
    // Tracks: upsert is create-or-replace keyed by track_id.
    let mut t = track("H-TRK-0001");
    store.upsert_track(&t).await?;
    t.detection_count = 2;
    t.confidence = 0.9;
    store.upsert_track(&t).await?;
    let fetched = store.get_track("H-TRK-0001").await?.expect("track exists");
    assert_eq!(fetched.detection_count, 2);
    assert!(store.get_track("missing").await?.is_none());

    store.upsert_track(&track("F-TRK-0042")).await?;
    let all = store.list_tracks(&TrackQuery::default()).await?;
    assert!(all.len() >= 2);
    let hostile_only = store
        .list_tracks(&TrackQuery {
            classification: Some(Classification::Hostile),
            ..TrackQuery::default()
        })
        .await?;
    assert!(
        hostile_only
            .iter()
            .all(|t| t.classification == Classification::Hostile)
    );
    let future_only = store
        .list_tracks(&TrackQuery {
            since: Some(Utc::now() + Duration::seconds(60)),
            ..TrackQuery::default()
        })
        .await?;
    assert!(future_only.is_empty(), "since filter must bound last_updated");

    // Detections: append-only history, newest first.
    for i in 0..3 {
        store
            .insert_detection(&DetectionRecord {
                detection_id: Uuid::new_v4(),
                track_id: "H-TRK-0001".into(),
                sensor_id: "sensor-1".into(),
                position: t.position,
                raw_data: serde_json::json!({"seq": i}),
                created_at: Utc::now() + Duration::milliseconds(i),
            })
            .await?;
    }
    let history = store.list_detections("H-TRK-0001", 10).await?;
    assert_eq!(history.len(), 3);
    // A redelivered detection must not duplicate the row.
    let replay = history[0].clone();
    store.insert_detection(&replay).await?;
    assert_eq!(store.list_detections("H-TRK-0001", 10).await?.len(), 3);
    assert!(history[0].created_at >= history[2].created_at);
    let limited = store.list_detections("H-TRK-0001", 2).await?;
    assert_eq!(limited.len(), 2);

    // Proposals: the pending-unique upsert.
    let first = proposal("H-TRK-0001", 8);
    let first_id = first.proposal_id;
    assert!(matches!(
        store.insert_pending_proposal(&first).await?,
        ProposalInsert::Inserted
    ));

    let duplicate = proposal("H-TRK-0001", 9);
    match store.insert_pending_proposal(&duplicate).await? {
        ProposalInsert::Merged(merged) => {
            assert_eq!(merged.proposal_id, first_id, "existing row absorbs the hit");
            assert_eq!(merged.hit_count, 2);
            assert_eq!(merged.priority, 9, "priority raises to max(existing, new)");
            assert!(merged.last_hit_at.is_some());
        }
        ProposalInsert::Inserted => panic!("second pending insert for a track must merge"),
    }

    assert!(matches!(
        store.insert_pending_proposal(&proposal("F-TRK-0042", 2)).await?,
        ProposalInsert::Inserted
    ));

    let pending = store.list_proposals(&ProposalQuery::default()).await?;
    assert_eq!(pending.len(), 2);

    // Transition: pending → terminal exactly once.
    assert!(
        store
            .transition_proposal(first_id, ProposalStatus::Approved)
            .await?
    );
    assert!(
        !store
            .transition_proposal(first_id, ProposalStatus::Denied)
            .await?,
        "terminal proposals must not transition again"
    );
    assert!(
        !store
            .transition_proposal(Uuid::new_v4(), ProposalStatus::Approved)
            .await?
    );
    let decided = store.get_proposal(first_id).await?.expect("row exists");
    assert_eq!(decided.status, ProposalStatus::Approved);

    // Once the pending row is terminal, the track may get a new pending row.
    assert!(matches!(
        store.insert_pending_proposal(&proposal("H-TRK-0001", 5)).await?,
        ProposalInsert::Inserted
    ));

    // Decisions.
    let decision = DecisionRecord {
        decision_id: Uuid::new_v4(),
        proposal_id: first_id,
        approved: true,
        approved_by: "op-001".into(),
        approved_at: Utc::now(),
        reason: "confirmed hostile".into(),
        conditions: vec![],
        action_type: ActionType::Intercept,
        track_id: "H-TRK-0001".into(),
    };
    store.insert_decision(&decision).await?;
    let fetched = store
        .get_decision(decision.decision_id)
        .await?
        .expect("decision exists");
    assert_eq!(fetched.approved_by, "op-001");
    let listed = store
        .list_decisions(&crate::query::DecisionQuery {
            approved: Some(true),
            ..Default::default()
        })
        .await?;
    assert!(listed.iter().any(|d| d.decision_id == decision.decision_id));

    // Effects: idempotent-key uniqueness.
    let e = effect("key-1");
    assert!(store.insert_effect(&e).await?);
    let mut clash = effect("key-1");
    clash.effect_id = Uuid::new_v4();
    assert!(
        !store.insert_effect(&clash).await?,
        "duplicate idempotent key must not write"
    );
    let stored = store
        .get_effect_by_key("key-1")
        .await?
        .expect("effect exists");
    assert_eq!(stored.effect_id, e.effect_id, "first writer wins");
    let executed = store
        .list_effects(&EffectQuery {
            status: Some(EffectStatus::Executed),
            ..Default::default()
        })
        .await?;
    assert!(executed.iter().any(|x| x.idempotent_key == "key-1"));

    // Audit.
    store
        .append_audit(
            &AuditRecord::new("proposal", first_id.to_string(), "approved", "op-001")
                .with_new_value(serde_json::json!({"status": "approved"})),
        )
        .await?;
    let audit = store
        .list_audit(&AuditQuery {
            actor_id: Some("op-001".into()),
            ..Default::default()
        })
        .await?;
    assert!(!audit.is_empty());
    assert!(audit.iter().all(|a| a.actor_id == "op-001"));

    // Intervention rules: ordering and delete.
    let mut early = InterventionRule {
        rule_id: Uuid::new_v4(),
        name: "first".into(),
        action_types: vec![],
        threat_levels: vec![],
        classifications: vec![],
        track_types: vec![],
        min_priority: None,
        max_priority: None,
        requires_approval: true,
        auto_approve: false,
        enabled: true,
        evaluation_order: 1,
    };
    let mut late = early.clone();
    late.rule_id = Uuid::new_v4();
    late.name = "second".into();
    late.evaluation_order = 2;
    late.enabled = false;
    store.upsert_rule(&late).await?;
    store.upsert_rule(&early).await?;

    let rules = store.list_rules(false).await?;
    let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
    let first_pos = names.iter().position(|n| *n == "first").expect("first rule");
    let second_pos = names.iter().position(|n| *n == "second").expect("second rule");
    assert!(first_pos < second_pos, "rules must order by evaluation_order");
    let enabled = store.list_rules(true).await?;
    assert!(enabled.iter().all(|r| r.enabled));

    early.requires_approval = false;
    store.upsert_rule(&early).await?;
    let updated = store.get_rule(early.rule_id).await?.expect("rule exists");
    assert!(!updated.requires_approval);

    assert!(store.delete_rule(late.rule_id).await?);
    assert!(!store.delete_rule(late.rule_id).await?);

    // Counters.
    assert_eq!(store.increment_counter("emitted", 2).await?, 2);
    assert_eq!(store.increment_counter("emitted", 3).await?, 5);
    assert_eq!(store.get_counter("emitted").await?, 5);
    assert_eq!(store.get_counter("absent").await?, 0);

    // Aggregates.
    let summary = store
        .metrics_summary(Utc::now() - Duration::seconds(60))
        .await?;
    assert!(summary.active_tracks >= 2);
    assert_eq!(summary.proposals_approved, 1);
    assert_eq!(summary.effects_executed, 1);
    assert_eq!(summary.counters.get("emitted"), Some(&5));

    let stages = store
        .stage_metrics(Utc::now() - Duration::seconds(60))
        .await?;
    assert!(stages.iter().any(|s| s.stage == "detect" && s.processed >= 3));

    // clear_all wipes pipeline data, keeps rules and counters.
    store.clear_all().await?;
    assert!(store.list_tracks(&TrackQuery::default()).await?.is_empty());
    assert!(
        store
            .list_proposals(&ProposalQuery {
                status: None,
                ..Default::default()
            })
            .await?
            .is_empty()
    );
    assert!(store.get_effect_by_key("key-1").await?.is_none());
    assert_eq!(store.get_counter("emitted").await?, 5);
    assert!(store.get_rule(early.rule_id).await?.is_some());

    store.health_check().await?;
    Ok(())
}
