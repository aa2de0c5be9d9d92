use serde::{Deserialize, Serialize};

/// Verdict returned by the policy engine's `decide` RPC.
///
/// A denial (`allowed = false`) is not always terminal: the planner attaches
/// the decision to the proposal so operators see the violation, while the
/// effector treats it as final. See the worker call sites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PolicyDecision {
    /// Whether the evaluated request is permitted.
    pub allowed: bool,

    /// Positive rationale for the verdict.
    #[serde(default)]
    pub reasons: Vec<String>,

    /// Non-fatal observations (e.g. the engine was unreachable and the
    /// caller proceeded).
    #[serde(default)]
    pub warnings: Vec<String>,

    /// Rules that the request violated.
    #[serde(default)]
    pub violations: Vec<String>,

    /// Engine-specific metadata.
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: serde_json::Value,
}

impl PolicyDecision {
    /// An allow verdict with no annotations.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }

    /// A deny verdict with one violation entry.
    #[must_use]
    pub fn deny(violation: impl Into<String>) -> Self {
        Self {
            allowed: false,
            violations: vec![violation.into()],
            ..Self::default()
        }
    }

    /// An allow verdict carrying a warning, used when the engine could not
    /// be consulted but processing continues.
    #[must_use]
    pub fn allow_with_warning(warning: impl Into<String>) -> Self {
        Self {
            allowed: true,
            warnings: vec![warning.into()],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_records_violation() {
        let d = PolicyDecision::deny("expired proposal");
        assert!(!d.allowed);
        assert_eq!(d.violations, vec!["expired proposal".to_string()]);
    }

    #[test]
    fn serde_defaults_tolerate_sparse_responses() {
        let d: PolicyDecision = serde_json::from_str(r#"{"allowed": true}"#).unwrap();
        assert!(d.allowed);
        assert!(d.reasons.is_empty());
        assert!(d.metadata.is_null());
    }
}
