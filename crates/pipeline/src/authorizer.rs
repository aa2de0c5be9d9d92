//! Authorizer worker: the human-decision gate.
//!
//! Intake persists proposals under the pending-per-track uniqueness and
//! retains the broker delivery unacked until a human adjudicates or the
//! proposal expires. Outstanding broker state is therefore bounded by the
//! number of distinct pending tracks. The authorizer never approves on its
//! own and never retries a human decision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sentinel_broker::Delivery;
use sentinel_core::{Decision, Envelope, Message, Proposal, SourceType};
use sentinel_store::{
    AuditRecord, DecisionRecord, ProposalInsert, ProposalRecord, ProposalStatus, Store,
    StoreError,
};

use crate::WorkerContext;
use crate::metrics::PipelineMetrics;
use crate::runtime::{Handled, MessageHandler, WorkerError, attest, decode, publish_message};

/// How often the expiration sweeper runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A decision submitted by an operator through the gateway.
#[derive(Debug, Clone)]
pub struct DecideRequest {
    pub approved: bool,
    pub approved_by: String,
    pub reason: String,
    pub conditions: Vec<String>,
}

/// Why a decision was rejected.
#[derive(Debug, Error)]
pub enum DecideError {
    #[error("proposal not found")]
    NotFound,

    #[error("proposal already decided: {0}")]
    AlreadyDecided(ProposalStatus),

    #[error("proposal expired")]
    Expired,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("decision publish failed: {0}")]
    Broker(String),
}

struct Retained {
    delivery: Delivery,
    envelope: Envelope,
}

/// The authorizer worker. Clone the [`Arc`] to share the decision surface
/// with the gateway.
pub struct Authorizer {
    ctx: WorkerContext,
    retained: Mutex<HashMap<uuid::Uuid, Retained>>,
}

enum Intake {
    /// First insert: the delivery must stay outstanding.
    Retain(Proposal),
    /// Merged into an existing pending proposal, or already terminal.
    Settle,
}

impl Authorizer {
    #[must_use]
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            retained: Mutex::new(HashMap::new()),
        }
    }

    fn record_from_message(proposal: &Proposal) -> Result<ProposalRecord, WorkerError> {
        Ok(ProposalRecord {
            proposal_id: proposal.proposal_id,
            track_id: proposal.track_id.clone(),
            action_type: proposal.action_type,
            priority: proposal.priority,
            threat_level: proposal.threat_level,
            rationale: proposal.rationale.clone(),
            constraints: proposal.constraints.clone(),
            track_data: serde_json::to_value(&proposal.track).map_err(WorkerError::from)?,
            policy_decision: proposal
                .policy_decision
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(WorkerError::from)?,
            status: ProposalStatus::Pending,
            expires_at: proposal.expires_at,
            hit_count: 1,
            last_hit_at: None,
            correlation_id: proposal.envelope.correlation_id,
            created_at: proposal.created_at,
        })
    }

    async fn intake(&self, delivery: &Delivery) -> Result<Intake, WorkerError> {
        let proposal: Proposal = decode(&delivery.payload)?;
        attest(&proposal, &self.ctx.signing_secret)?;

        // Already adjudicated or expired: nothing left to hold open.
        if let Some(existing) = self.ctx.store.get_proposal(proposal.proposal_id).await?
            && existing.status.is_terminal()
        {
            return Ok(Intake::Settle);
        }

        let record = Self::record_from_message(&proposal)?;
        match self.ctx.store.insert_pending_proposal(&record).await? {
            ProposalInsert::Inserted => {
                self.audit_proposal(&record, "created").await;
                info!(
                    proposal_id = %record.proposal_id,
                    track_id = %record.track_id,
                    action = %record.action_type,
                    priority = record.priority,
                    "proposal pending adjudication"
                );
                Ok(Intake::Retain(proposal))
            }
            ProposalInsert::Merged(merged) => {
                PipelineMetrics::incr(&self.ctx.metrics.authorizer_proposals_merged);
                debug!(
                    proposal_id = %merged.proposal_id,
                    track_id = %merged.track_id,
                    hit_count = merged.hit_count,
                    priority = merged.priority,
                    "sensor hit merged into pending proposal"
                );
                Ok(Intake::Settle)
            }
        }
    }

    async fn audit_proposal(&self, record: &ProposalRecord, action: &str) {
        let entry = AuditRecord::new(
            "proposal",
            record.proposal_id.to_string(),
            action,
            &self.ctx.agent_id,
        )
        .with_new_value(serde_json::json!({
            "track_id": record.track_id,
            "action_type": record.action_type,
            "priority": record.priority,
            "status": record.status,
        }))
        .with_correlation(record.correlation_id);
        if let Err(e) = self.ctx.store.append_audit(&entry).await {
            warn!(error = %e, "audit append failed");
        }
    }

    /// Number of retained (unacked) proposal deliveries.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained.lock().len()
    }

    /// Run one expiration sweep: expire overdue pending proposals and
    /// release handles whose rows were decided through the store path.
    /// Returns how many proposals expired.
    pub async fn sweep_expired(&self) -> usize {
        let ids: Vec<uuid::Uuid> = self.retained.lock().keys().copied().collect();
        let mut expired = 0;

        for proposal_id in ids {
            let row = match self.ctx.store.get_proposal(proposal_id).await {
                Ok(row) => row,
                Err(e) => {
                    warn!(error = %e, "sweep lookup failed");
                    continue;
                }
            };

            match row {
                None => {
                    // Row vanished (development clear): drop the message.
                    self.release(proposal_id, Release::Term).await;
                }
                Some(record) if record.status.is_terminal() => {
                    // Decided through the store path (standalone gateway).
                    self.release(proposal_id, Release::Ack).await;
                }
                Some(record) if record.expires_at <= Utc::now() => {
                    match self
                        .ctx
                        .store
                        .transition_proposal(proposal_id, ProposalStatus::Expired)
                        .await
                    {
                        Ok(true) => {
                            expired += 1;
                            PipelineMetrics::incr(&self.ctx.metrics.authorizer_proposals_expired);
                            let mut audited = record;
                            audited.status = ProposalStatus::Expired;
                            self.audit_proposal(&audited, "expired").await;
                            info!(%proposal_id, "proposal expired before adjudication");
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(error = %e, "expire transition failed");
                            continue;
                        }
                    }
                    // Past max age: a redelivery would be semantically
                    // wrong, so the message is terminated, not naked.
                    self.release(proposal_id, Release::Term).await;
                }
                Some(_) => {}
            }
        }
        expired
    }

    async fn release(&self, proposal_id: uuid::Uuid, mode: Release) {
        let retained = self.retained.lock().remove(&proposal_id);
        let Some(retained) = retained else {
            return;
        };
        self.ctx
            .metrics
            .authorizer_proposals_pending
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        let result = match mode {
            Release::Ack => retained.delivery.ack().await,
            Release::Term => retained.delivery.term().await,
        };
        if let Err(e) = result {
            warn!(%proposal_id, error = %e, "retained delivery release failed");
        }
    }

    /// Spawn the periodic expiration sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let authorizer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        authorizer.sweep_expired().await;
                    }
                }
            }
        })
    }

    /// Adjudicate a pending proposal. Called by the gateway, not the broker.
    pub async fn decide(
        &self,
        proposal_id: uuid::Uuid,
        request: DecideRequest,
    ) -> Result<DecisionRecord, DecideError> {
        if request.approved_by.trim().is_empty() {
            return Err(DecideError::Validation("approved_by must not be empty".into()));
        }
        if request.approved_by == "system" {
            return Err(DecideError::Validation(
                "approved_by must identify a human operator".into(),
            ));
        }

        let record = self
            .ctx
            .store
            .get_proposal(proposal_id)
            .await?
            .ok_or(DecideError::NotFound)?;

        match record.status {
            ProposalStatus::Pending => {}
            ProposalStatus::Expired => return Err(DecideError::Expired),
            other => return Err(DecideError::AlreadyDecided(other)),
        }

        // A proposal expiring exactly now is expired, not decidable.
        if record.expires_at <= Utc::now() {
            if self
                .ctx
                .store
                .transition_proposal(proposal_id, ProposalStatus::Expired)
                .await?
            {
                PipelineMetrics::incr(&self.ctx.metrics.authorizer_proposals_expired);
                self.release(proposal_id, Release::Term).await;
            }
            return Err(DecideError::Expired);
        }

        let to = if request.approved {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Denied
        };
        if !self.ctx.store.transition_proposal(proposal_id, to).await? {
            // Lost a race with another decision or the sweeper.
            let current = self
                .ctx
                .store
                .get_proposal(proposal_id)
                .await?
                .ok_or(DecideError::NotFound)?;
            return match current.status {
                ProposalStatus::Expired => Err(DecideError::Expired),
                other => Err(DecideError::AlreadyDecided(other)),
            };
        }

        // Prefer the retained message's envelope so the decision correlates
        // through causation; otherwise synthesize from the persisted
        // correlation id (the handle may live in another process).
        let parent = self
            .retained
            .lock()
            .get(&proposal_id)
            .map(|r| r.envelope.clone())
            .unwrap_or_else(|| {
                let mut envelope = Envelope::root(&self.ctx.agent_id, SourceType::Authorizer);
                envelope.correlation_id = record.correlation_id;
                envelope
            });

        let mut decision = Decision::new(
            &parent,
            &self.ctx.agent_id,
            proposal_id,
            record.track_id.clone(),
            record.action_type,
            request.approved,
            request.approved_by.clone(),
            request.reason.clone(),
            request.conditions.clone(),
        );
        if let Err(e) = decision.sign(&self.ctx.signing_secret) {
            return Err(DecideError::Broker(e.to_string()));
        }

        let decision_record = DecisionRecord {
            decision_id: decision.decision_id,
            proposal_id,
            approved: decision.approved,
            approved_by: decision.approved_by.clone(),
            approved_at: decision.decided_at,
            reason: decision.reason.clone(),
            conditions: decision.conditions.clone(),
            action_type: decision.action_type,
            track_id: decision.track_id.clone(),
        };
        self.ctx.store.insert_decision(&decision_record).await?;

        let entry = AuditRecord::new(
            "decision",
            decision.decision_id.to_string(),
            if request.approved { "approved" } else { "denied" },
            &request.approved_by,
        )
        .with_new_value(serde_json::json!({
            "proposal_id": proposal_id,
            "track_id": decision.track_id,
            "action_type": decision.action_type,
            "reason": request.reason,
        }))
        .with_correlation(record.correlation_id);
        if let Err(e) = self.ctx.store.append_audit(&entry).await {
            warn!(error = %e, "audit append failed");
        }

        publish_message(self.ctx.broker.as_ref(), &decision)
            .await
            .map_err(|e| DecideError::Broker(e.to_string()))?;

        // Free the PROPOSALS slot now that a human has spoken.
        self.release(proposal_id, Release::Ack).await;
        PipelineMetrics::incr(&self.ctx.metrics.authorizer_decisions_recorded);
        info!(
            %proposal_id,
            decision_id = %decision.decision_id,
            approved = request.approved,
            approved_by = %request.approved_by,
            "decision recorded"
        );
        Ok(decision_record)
    }
}

enum Release {
    Ack,
    Term,
}

#[async_trait]
impl MessageHandler for Authorizer {
    fn name(&self) -> &'static str {
        "authorizer"
    }

    async fn process(&self, delivery: &Delivery) -> Result<(), WorkerError> {
        // Settlement is decided in `handle`; this path is unused.
        let _ = delivery;
        Ok(())
    }

    async fn handle(&self, delivery: Delivery) -> Handled {
        match self.intake(&delivery).await {
            Ok(Intake::Retain(proposal)) => {
                self.ctx
                    .metrics
                    .authorizer_proposals_pending
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.retained.lock().insert(
                    proposal.proposal_id,
                    Retained {
                        delivery,
                        envelope: proposal.envelope,
                    },
                );
                Handled::Retained
            }
            Ok(Intake::Settle) => Handled::Done(delivery),
            Err(WorkerError::Malformed(reason)) => Handled::Malformed(delivery, reason),
            Err(WorkerError::Transient(reason)) => Handled::Transient(delivery, reason),
        }
    }
}
