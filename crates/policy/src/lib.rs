//! Policy engine client.
//!
//! The engine is consulted synchronously at four points in the pipeline.
//! Callers differ deliberately in how they treat an unreachable engine: the
//! planner attaches a warning and continues (its output still crosses the
//! human gate), while the effector fails closed (it is the last gate before
//! an external effect).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use sentinel_core::PolicyDecision;

/// The four decision paths exposed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPath {
    /// Envelope source/MAC validation, applied to every consumed message.
    OriginAttestation,
    /// Clearance ↔ classification matrix for enriched data.
    DataHandling,
    /// Proposal pre-check, called by the planner.
    ProposalRules,
    /// Effect-release check, called by the effector.
    EffectsRelease,
}

impl PolicyPath {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OriginAttestation => "origin/attestation",
            Self::DataHandling => "data_handling",
            Self::ProposalRules => "proposals/rules",
            Self::EffectsRelease => "effects/release",
        }
    }
}

impl fmt::Display for PolicyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the policy RPC. Distinct from a deny verdict: a deny is a
/// successful evaluation.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Engine unreachable or request timed out.
    #[error("policy engine unreachable: {0}")]
    Unreachable(String),

    /// Engine returned a malformed response.
    #[error("policy response malformed: {0}")]
    Malformed(String),
}

/// The policy surface the workers are written against.
#[async_trait]
pub trait PolicyClient: Send + Sync {
    /// Evaluate `input` against the rules at `path`.
    async fn check(
        &self,
        path: PolicyPath,
        input: &serde_json::Value,
    ) -> Result<PolicyDecision, PolicyError>;
}

/// HTTP policy client with a hard request timeout.
pub struct HttpPolicyClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPolicyClient {
    /// Build a client against `base_url`. Requests time out after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PolicyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PolicyClient for HttpPolicyClient {
    async fn check(
        &self,
        path: PolicyPath,
        input: &serde_json::Value,
    ) -> Result<PolicyDecision, PolicyError> {
        let url = format!("{}/v1/policies/{}/decide", self.base_url, path.as_str());
        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| PolicyError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PolicyError::Unreachable(format!(
                "policy engine returned {}",
                response.status()
            )));
        }

        response
            .json::<PolicyDecision>()
            .await
            .map_err(|e| PolicyError::Malformed(e.to_string()))
    }
}

/// Fixed-verdict client for local development and tests. The default
/// instance allows everything.
#[derive(Debug, Clone)]
pub struct StaticPolicyClient {
    decision: PolicyDecision,
}

impl StaticPolicyClient {
    /// Allow every request.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            decision: PolicyDecision::allow(),
        }
    }

    /// Return the given verdict for every request.
    #[must_use]
    pub fn with_decision(decision: PolicyDecision) -> Self {
        Self { decision }
    }
}

impl Default for StaticPolicyClient {
    fn default() -> Self {
        Self::allow_all()
    }
}

#[async_trait]
impl PolicyClient for StaticPolicyClient {
    async fn check(
        &self,
        _path: PolicyPath,
        _input: &serde_json::Value,
    ) -> Result<PolicyDecision, PolicyError> {
        Ok(self.decision.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_strings() {
        assert_eq!(PolicyPath::OriginAttestation.as_str(), "origin/attestation");
        assert_eq!(PolicyPath::DataHandling.as_str(), "data_handling");
        assert_eq!(PolicyPath::ProposalRules.as_str(), "proposals/rules");
        assert_eq!(PolicyPath::EffectsRelease.as_str(), "effects/release");
    }

    #[tokio::test]
    async fn static_client_returns_fixed_verdict() {
        let client = StaticPolicyClient::with_decision(PolicyDecision::deny("blocked"));
        let verdict = client
            .check(PolicyPath::EffectsRelease, &serde_json::json!({}))
            .await
            .unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.violations, vec!["blocked".to_string()]);
    }

    #[tokio::test]
    async fn http_client_reports_unreachable() {
        // Reserved TEST-NET address: nothing listens there.
        let client =
            HttpPolicyClient::new("http://192.0.2.1:9", Duration::from_millis(200)).unwrap();
        let err = client
            .check(PolicyPath::ProposalRules, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Unreachable(_)));
    }
}
