//! Gateway handler tests over the in-process backends.

use std::sync::Arc;

use axum_test::TestServer;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sentinel_broker::Broker;
use sentinel_broker_memory::MemoryBroker;
use sentinel_core::{ActionType, ThreatLevel};
use sentinel_gateway::{AppState, router, spawn_hub};
use sentinel_pipeline::sensor::{SensorConfig, SensorControl};
use sentinel_pipeline::{Authorizer, WorkerContext, topology};
use sentinel_policy::StaticPolicyClient;
use sentinel_store::{ProposalRecord, ProposalStatus, Store};
use sentinel_store_memory::MemoryStore;

struct TestApp {
    server: TestServer,
    store: Arc<MemoryStore>,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn test_app() -> TestApp {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(MemoryStore::new());
    for spec in topology::streams() {
        broker.ensure_stream(&spec).await.expect("stream creation");
    }

    let ctx = WorkerContext::new(
        Arc::clone(&broker) as Arc<dyn Broker>,
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(StaticPolicyClient::allow_all()),
        "gateway-test",
        b"gateway-secret".to_vec(),
    );
    let authorizer = Arc::new(Authorizer::new(ctx.clone()));
    let sensor = Arc::new(SensorControl::new(
        SensorConfig::default(),
        Arc::clone(&ctx.broker),
        Arc::clone(&ctx.store),
    ));

    let shutdown = CancellationToken::new();
    let hub = spawn_hub(
        Arc::clone(&ctx.broker),
        Arc::clone(&ctx.store),
        shutdown.clone(),
    );

    let state = AppState {
        store: Arc::clone(&ctx.store),
        broker: Arc::clone(&ctx.broker),
        authorizer,
        sensor: Some(sensor),
        metrics: Arc::clone(&ctx.metrics),
        hub,
        agent_id: "gateway-test".into(),
    };
    let server = TestServer::new(router(state));
    TestApp {
        server,
        store,
        shutdown,
    }
}

fn pending_proposal(track_id: &str) -> ProposalRecord {
    ProposalRecord {
        proposal_id: Uuid::new_v4(),
        track_id: track_id.to_string(),
        action_type: ActionType::Intercept,
        priority: 8,
        threat_level: ThreatLevel::High,
        rationale: "hostile aircraft".into(),
        constraints: vec![],
        track_data: json!({"track_id": track_id}),
        policy_decision: None,
        status: ProposalStatus::Pending,
        expires_at: Utc::now() + Duration::minutes(10),
        hit_count: 1,
        last_hit_at: None,
        correlation_id: Uuid::new_v4(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app().await;
    let response = app.server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["dependencies"]["store"], "ok");
}

#[tokio::test]
async fn unknown_track_is_404_with_code() {
    let app = test_app().await;
    let response = app.server.get("/api/v1/tracks/NOPE").await;
    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "TRACK_NOT_FOUND");
}

#[tokio::test]
async fn invalid_filter_is_400() {
    let app = test_app().await;
    let response = app
        .server
        .get("/api/v1/tracks")
        .add_query_param("classification", "martian")
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn decide_flow_and_conflicts() {
    let app = test_app().await;
    let proposal = pending_proposal("H-TRK-0001");
    app.store
        .insert_pending_proposal(&proposal)
        .await
        .expect("insert proposal");

    // Malformed id.
    let response = app
        .server
        .post("/api/v1/proposals/not-a-uuid/decide")
        .json(&json!({"approved": true, "approved_by": "op-001", "reason": "r"}))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "INVALID_UUID");

    // Missing fields.
    let response = app
        .server
        .post(&format!("/api/v1/proposals/{}/decide", proposal.proposal_id))
        .json(&json!({"approved": true}))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "MISSING_FIELD");

    // Unknown proposal.
    let response = app
        .server
        .post(&format!("/api/v1/proposals/{}/decide", Uuid::new_v4()))
        .json(&json!({"approved": true, "approved_by": "op-001", "reason": "r"}))
        .await;
    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "PROPOSAL_NOT_FOUND");

    // Valid decision.
    let response = app
        .server
        .post(&format!("/api/v1/proposals/{}/decide", proposal.proposal_id))
        .json(&json!({
            "approved": false,
            "approved_by": "op-002",
            "reason": "Insufficient confidence"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["decision"]["approved"], false);
    assert_eq!(body["decision"]["approved_by"], "op-002");

    // Second decision conflicts.
    let response = app
        .server
        .post(&format!("/api/v1/proposals/{}/decide", proposal.proposal_id))
        .json(&json!({"approved": true, "approved_by": "op-001", "reason": "retry"}))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "PROPOSAL_ALREADY_DECIDED");
}

#[tokio::test]
async fn expired_proposal_conflicts_with_expired_code() {
    let app = test_app().await;
    let mut proposal = pending_proposal("H-TRK-0002");
    proposal.expires_at = Utc::now() - Duration::seconds(1);
    app.store
        .insert_pending_proposal(&proposal)
        .await
        .expect("insert proposal");

    let response = app
        .server
        .post(&format!("/api/v1/proposals/{}/decide", proposal.proposal_id))
        .json(&json!({"approved": true, "approved_by": "op-001", "reason": "late"}))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "PROPOSAL_EXPIRED");

    let row = app
        .store
        .get_proposal(proposal.proposal_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ProposalStatus::Expired);
}

#[tokio::test]
async fn proposals_default_to_pending() {
    let app = test_app().await;
    let pending = pending_proposal("H-TRK-0003");
    app.store.insert_pending_proposal(&pending).await.unwrap();
    let decided = pending_proposal("H-TRK-0004");
    app.store.insert_pending_proposal(&decided).await.unwrap();
    app.store
        .transition_proposal(decided.proposal_id, ProposalStatus::Denied)
        .await
        .unwrap();

    let response = app.server.get("/api/v1/proposals").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["count"], 1);

    let response = app
        .server
        .get("/api/v1/proposals")
        .add_query_param("status", "all")
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn sensor_config_patch_validates_atomically() {
    let app = test_app().await;

    let response = app.server.get("/api/v1/sensor/config").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["config"]["emission_interval_ms"], 1000);

    // Out-of-range interval rejects the whole patch, including the valid
    // track_count.
    let response = app
        .server
        .patch("/api/v1/sensor/config")
        .json(&json!({"emission_interval_ms": 50, "track_count": 5}))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let current: serde_json::Value = app.server.get("/api/v1/sensor/config").await.json();
    assert_eq!(current["config"]["track_count"], 10);

    // Boundary values are accepted.
    let response = app
        .server
        .patch("/api/v1/sensor/config")
        .json(&json!({"emission_interval_ms": 100, "paused": true}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["config"]["emission_interval_ms"], 100);
    assert_eq!(body["config"]["paused"], true);

    // Reset restores defaults.
    let response = app.server.post("/api/v1/sensor/config/reset").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["config"]["emission_interval_ms"], 1000);
    assert_eq!(body["config"]["paused"], false);
}

#[tokio::test]
async fn rules_crud_round_trip() {
    let app = test_app().await;

    let response = app
        .server
        .post("/api/v1/intervention-rules")
        .json(&json!({
            "name": "kinetic gate",
            "action_types": ["engage", "intercept"],
            "requires_approval": true,
            "evaluation_order": 1
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let rule_id = body["rule"]["rule_id"].as_str().unwrap().to_string();

    let response = app.server.get("/api/v1/intervention-rules").await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["count"], 1);

    let response = app
        .server
        .patch(&format!("/api/v1/intervention-rules/{rule_id}"))
        .json(&json!({"enabled": false}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["rule"]["enabled"], false);

    let response = app
        .server
        .delete(&format!("/api/v1/intervention-rules/{rule_id}"))
        .await;
    response.assert_status_ok();

    let response = app
        .server
        .get(&format!("/api/v1/intervention-rules/{rule_id}"))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn invalid_rule_enum_is_rejected() {
    let app = test_app().await;
    let response = app
        .server
        .post("/api/v1/intervention-rules")
        .json(&json!({
            "name": "bad",
            "action_types": ["self_destruct"],
            "requires_approval": true,
            "evaluation_order": 1
        }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn clear_wipes_pipeline_data() {
    let app = test_app().await;
    app.store
        .insert_pending_proposal(&pending_proposal("H-TRK-0005"))
        .await
        .unwrap();

    let response = app.server.post("/api/v1/clear").await;
    response.assert_status_ok();

    let response = app
        .server
        .get("/api/v1/proposals")
        .add_query_param("status", "all")
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn metrics_endpoints_respond() {
    let app = test_app().await;

    let response = app.server.get("/api/v1/metrics").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["summary"].is_object());
    assert!(body["process"].is_object());

    let response = app.server.get("/api/v1/metrics/stages").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["stages"].as_array().unwrap().len(), 5);

    let response = app.server.get("/api/v1/metrics/latency").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["window_seconds"], 300);

    let response = app.server.get("/metrics").await;
    response.assert_status_ok();
    let text = response.text();
    assert!(text.contains("effector_effects_idempotent_total"));
}
