//! End-to-end pipeline scenarios over the in-process backends: detections
//! flow through classification, correlation, planning, human adjudication,
//! and effect execution with real consume loops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sentinel_broker::Broker;
use sentinel_broker_memory::MemoryBroker;
use sentinel_core::{
    ActionType, Classification, CorrelatedTrack, Decision, Detection, Envelope, Message, Position,
    SourceType, ThreatLevel, TrackType, Velocity, idempotent_key,
};
use sentinel_pipeline::{
    Authorizer, Classifier, ConsumeLoop, Correlator, DecideError, DecideRequest, Effector,
    MessageHandler, WorkerContext, topology,
};
use sentinel_policy::StaticPolicyClient;
use sentinel_store::{
    EffectQuery, ProposalQuery, ProposalRecord, ProposalStatus, Store,
};
use sentinel_store_memory::MemoryStore;

const SECRET: &[u8] = b"e2e-secret";

struct Harness {
    broker: Arc<MemoryBroker>,
    store: Arc<MemoryStore>,
    ctx: WorkerContext,
    authorizer: Arc<Authorizer>,
    shutdown: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start() -> Harness {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(MemoryStore::new());
    for spec in topology::streams() {
        broker.ensure_stream(&spec).await.expect("stream creation");
    }

    let ctx = WorkerContext::new(
        Arc::clone(&broker) as Arc<dyn Broker>,
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(StaticPolicyClient::allow_all()),
        "e2e-node",
        SECRET,
    );

    let shutdown = CancellationToken::new();
    let authorizer = Arc::new(Authorizer::new(ctx.clone()));

    let fetch_wait = Duration::from_millis(50);
    let loops: Vec<(&'static str, sentinel_broker::ConsumerSpec, Arc<dyn MessageHandler>)> = vec![
        {
            let (stream, spec) = topology::classifier_consumer();
            (stream, spec, Arc::new(Classifier::new(ctx.clone())))
        },
        {
            let (stream, spec) = topology::correlator_consumer();
            (stream, spec, Arc::new(Correlator::new(ctx.clone())))
        },
        {
            let (stream, spec) = topology::planner_consumer();
            (stream, spec, Arc::new(sentinel_pipeline::Planner::new(ctx.clone())))
        },
        {
            let (stream, spec) = topology::authorizer_consumer();
            (stream, spec, Arc::clone(&authorizer) as Arc<dyn MessageHandler>)
        },
        {
            let (stream, spec) = topology::effector_consumer();
            (stream, spec, Arc::new(Effector::new(ctx.clone())))
        },
    ];
    for (stream, spec, handler) in loops {
        let consume = ConsumeLoop::new(
            Arc::clone(&ctx.broker),
            stream,
            spec,
            handler,
            Arc::clone(&ctx.metrics),
        )
        .with_fetch_wait(fetch_wait);
        tokio::spawn(consume.run(shutdown.clone()));
    }

    Harness {
        broker,
        store,
        ctx,
        authorizer,
        shutdown,
    }
}

impl Harness {
    async fn emit_detection(
        &self,
        track_id: &str,
        track_type: TrackType,
        speed: f64,
        altitude: f64,
    ) -> Detection {
        let mut detection = Detection::new(
            "e2e-node",
            track_id,
            "sensor-1",
            "radar",
            Position {
                latitude: 35.0,
                longitude: 139.0,
                altitude,
            },
            Velocity {
                speed_mps: speed,
                heading_deg: 270.0,
            },
            0.9,
            Some(track_type),
        );
        detection.sign(SECRET).expect("signing");
        let payload = serde_json::to_vec(&detection).expect("serialization");
        self.broker
            .publish(&detection.subject(), payload.into())
            .await
            .expect("publish");
        detection
    }

    async fn pending_proposal(&self, track_id: &str) -> ProposalRecord {
        let store = Arc::clone(&self.store);
        let track_id = track_id.to_string();
        eventually(move || {
            let store = Arc::clone(&store);
            let track_id = track_id.clone();
            async move {
                store
                    .list_proposals(&ProposalQuery {
                        status: Some(ProposalStatus::Pending),
                        track_id: Some(track_id),
                        ..Default::default()
                    })
                    .await
                    .expect("list proposals")
                    .into_iter()
                    .next()
            }
        })
        .await
    }
}

async fn eventually<F, Fut, T>(mut condition: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..400 {
        if let Some(value) = condition().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn hostile_missile_flows_to_executed_effect() {
    let harness = start().await;
    let mut decision_subjects = harness
        .broker
        .subscribe("decision.approved.>")
        .await
        .expect("subscribe");

    let detection = harness
        .emit_detection("H-TRK-0001", TrackType::Missile, 650.0, 8_000.0)
        .await;

    let proposal = harness.pending_proposal("H-TRK-0001").await;
    assert_eq!(proposal.action_type, ActionType::Engage);
    assert_eq!(proposal.priority, 10);
    assert_eq!(proposal.threat_level, ThreatLevel::Critical);
    assert_eq!(proposal.correlation_id, detection.envelope.correlation_id);

    let decision = harness
        .authorizer
        .decide(
            proposal.proposal_id,
            DecideRequest {
                approved: true,
                approved_by: "op-001".into(),
                reason: "confirmed hostile missile".into(),
                conditions: vec![],
            },
        )
        .await
        .expect("decision accepted");
    assert!(decision.approved);

    let (subject, _) = decision_subjects.next().await.expect("decision on the bus");
    assert_eq!(subject, "decision.approved.engage");

    let store = Arc::clone(&harness.store);
    let effect = eventually(move || {
        let store = Arc::clone(&store);
        async move {
            store
                .list_effects(&EffectQuery::default())
                .await
                .expect("list effects")
                .into_iter()
                .next()
        }
    })
    .await;

    assert_eq!(effect.status, sentinel_core::EffectStatus::Executed);
    assert_eq!(
        effect.idempotent_key,
        idempotent_key(effect.decision_id, proposal.proposal_id, ActionType::Engage)
    );
    assert_eq!(effect.correlation_id, detection.envelope.correlation_id);

    // Proposal reached its terminal state and the broker slot was freed.
    let row = harness
        .store
        .get_proposal(proposal.proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ProposalStatus::Approved);
    assert_eq!(harness.authorizer.retained_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn friendly_track_never_reaches_the_authorizer() {
    let harness = start().await;
    harness
        .emit_detection("F-TRK-0042", TrackType::Aircraft, 200.0, 9_000.0)
        .await;

    // Wait until the track has fully traversed classification.
    let store = Arc::clone(&harness.store);
    let track = eventually(move || {
        let store = Arc::clone(&store);
        async move { store.get_track("F-TRK-0042").await.expect("get track") }
    })
    .await;
    assert_eq!(track.classification, Classification::Friendly);
    assert!(track.confidence > 0.9, "friendly confidence boosted");

    // Give the planner ample time, then confirm nothing was proposed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let proposals = harness
        .store
        .list_proposals(&ProposalQuery {
            status: None,
            ..Default::default()
        })
        .await
        .expect("list proposals");
    assert!(proposals.is_empty(), "monitor is passive: no proposal rows");
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_hits_merge_into_one_pending_proposal() {
    let harness = start().await;

    harness
        .emit_detection("H-TRK-0100", TrackType::Aircraft, 400.0, 11_000.0)
        .await;
    let first = harness.pending_proposal("H-TRK-0100").await;
    assert_eq!(first.action_type, ActionType::Intercept);
    assert_eq!(first.hit_count, 1);

    harness
        .emit_detection("H-TRK-0100", TrackType::Aircraft, 405.0, 11_050.0)
        .await;

    let store = Arc::clone(&harness.store);
    let first_id = first.proposal_id;
    let merged = eventually(move || {
        let store = Arc::clone(&store);
        async move {
            let row = store.get_proposal(first_id).await.expect("get proposal")?;
            (row.hit_count >= 2).then_some(row)
        }
    })
    .await;

    assert_eq!(merged.hit_count, 2);
    assert!(merged.last_hit_at.is_some());
    assert!(merged.priority >= first.priority);

    // Still exactly one proposal row for the track.
    let all = harness
        .store
        .list_proposals(&ProposalQuery {
            status: None,
            track_id: Some("H-TRK-0100".into()),
            ..Default::default()
        })
        .await
        .expect("list proposals");
    assert_eq!(all.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn operator_denial_produces_no_effect() {
    let harness = start().await;
    let mut denied_subjects = harness
        .broker
        .subscribe("decision.denied.>")
        .await
        .expect("subscribe");

    harness
        .emit_detection("H-TRK-0200", TrackType::Aircraft, 400.0, 11_000.0)
        .await;
    let proposal = harness.pending_proposal("H-TRK-0200").await;
    assert_eq!(proposal.action_type, ActionType::Intercept);

    harness
        .authorizer
        .decide(
            proposal.proposal_id,
            DecideRequest {
                approved: false,
                approved_by: "op-002".into(),
                reason: "Insufficient confidence".into(),
                conditions: vec![],
            },
        )
        .await
        .expect("denial accepted");

    let (subject, _) = denied_subjects.next().await.expect("denial on the bus");
    assert_eq!(subject, "decision.denied.intercept");

    let row = harness
        .store
        .get_proposal(proposal.proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ProposalStatus::Denied);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let effects = harness
        .store
        .list_effects(&EffectQuery::default())
        .await
        .expect("list effects");
    assert!(effects.is_empty(), "denied decisions never execute");

    // A second decision on the same proposal conflicts.
    let err = harness
        .authorizer
        .decide(
            proposal.proposal_id,
            DecideRequest {
                approved: true,
                approved_by: "op-003".into(),
                reason: "changed my mind".into(),
                conditions: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DecideError::AlreadyDecided(ProposalStatus::Denied)));
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_proposal_is_terminated_and_undecidable() {
    let harness = start().await;

    // A proposal whose deadline has already passed by the time it lands.
    let track = CorrelatedTrack {
        envelope: Envelope::root("e2e-node", SourceType::Sensor),
        track_id: "H-TRK-0300".into(),
        classification: Classification::Hostile,
        track_type: TrackType::Missile,
        threat_level: ThreatLevel::Critical,
        position: Position {
            latitude: 35.0,
            longitude: 139.0,
            altitude: 8_000.0,
        },
        velocity: Velocity {
            speed_mps: 650.0,
            heading_deg: 270.0,
        },
        confidence: 0.9,
        merged_from: vec!["H-TRK-0300".into()],
        sources: vec!["sensor-1".into()],
        detection_count: 1,
        window_start: Utc::now(),
        window_end: Utc::now(),
    };
    let mut proposal = sentinel_core::Proposal::new(
        &track,
        "e2e-node",
        ActionType::Engage,
        10,
        "hostile missile inbound",
        vec![],
        Utc::now(),
    );
    proposal.sign(SECRET).expect("signing");
    let payload = serde_json::to_vec(&proposal).expect("serialization");
    harness
        .broker
        .publish(&proposal.subject(), payload.into())
        .await
        .expect("publish");

    // Intake retains it first.
    let authorizer = Arc::clone(&harness.authorizer);
    eventually(move || {
        let authorizer = Arc::clone(&authorizer);
        async move { (authorizer.retained_count() == 1).then_some(()) }
    })
    .await;

    let expired = harness.authorizer.sweep_expired().await;
    assert_eq!(expired, 1);
    assert_eq!(harness.authorizer.retained_count(), 0);

    let row = harness
        .store
        .get_proposal(proposal.proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ProposalStatus::Expired);

    let err = harness
        .authorizer
        .decide(
            proposal.proposal_id,
            DecideRequest {
                approved: true,
                approved_by: "op-001".into(),
                reason: "too late".into(),
                conditions: vec![],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DecideError::Expired));
}

#[tokio::test(flavor = "multi_thread")]
async fn redelivered_decisions_execute_exactly_once() {
    let harness = start().await;

    // An approved, unexpired proposal already on file.
    let proposal_id = Uuid::new_v4();
    let record = ProposalRecord {
        proposal_id,
        track_id: "H-TRK-0400".into(),
        action_type: ActionType::Engage,
        priority: 10,
        threat_level: ThreatLevel::Critical,
        rationale: "hostile missile".into(),
        constraints: vec![],
        track_data: serde_json::Value::Null,
        policy_decision: None,
        status: ProposalStatus::Pending,
        expires_at: Utc::now() + chrono::Duration::minutes(10),
        hit_count: 1,
        last_hit_at: None,
        correlation_id: Uuid::new_v4(),
        created_at: Utc::now(),
    };
    harness
        .store
        .insert_pending_proposal(&record)
        .await
        .expect("insert proposal");
    harness
        .store
        .transition_proposal(proposal_id, ProposalStatus::Approved)
        .await
        .expect("approve");

    let mut decision = Decision::new(
        &Envelope::root("e2e-node", SourceType::Authorizer),
        "e2e-node",
        proposal_id,
        "H-TRK-0400",
        ActionType::Engage,
        true,
        "op-001",
        "confirmed",
        vec![],
    );
    decision.sign(SECRET).expect("signing");
    let payload = serde_json::to_vec(&decision).expect("serialization");

    // The same approved decision lands three times.
    for _ in 0..3 {
        harness
            .broker
            .publish(&decision.subject(), payload.clone().into())
            .await
            .expect("publish");
    }

    let store = Arc::clone(&harness.store);
    let key = idempotent_key(decision.decision_id, proposal_id, ActionType::Engage);
    let key_probe = key.clone();
    eventually(move || {
        let store = Arc::clone(&store);
        let key = key_probe.clone();
        async move { store.get_effect_by_key(&key).await.expect("get effect") }
    })
    .await;

    // Let the remaining redeliveries settle.
    let metrics = Arc::clone(&harness.ctx.metrics);
    eventually(move || {
        let metrics = Arc::clone(&metrics);
        async move {
            (metrics.snapshot().effector_effects_idempotent >= 2).then_some(())
        }
    })
    .await;

    let effects = harness
        .store
        .list_effects(&EffectQuery::default())
        .await
        .expect("list effects");
    assert_eq!(effects.len(), 1, "exactly one effect row");
    assert_eq!(effects[0].idempotent_key, key);
    assert_eq!(
        harness.ctx.metrics.snapshot().effector_effects_executed,
        1
    );
}
