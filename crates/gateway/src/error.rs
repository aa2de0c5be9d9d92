use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use sentinel_broker::BrokerError;
use sentinel_pipeline::DecideError;
use sentinel_store::StoreError;

/// The closed set of error codes the gateway returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    MissingField,
    InvalidUuid,
    TrackNotFound,
    ProposalNotFound,
    DecisionNotFound,
    EffectNotFound,
    ProposalExpired,
    ProposalAlreadyDecided,
    PolicyDenied,
    DatabaseError,
    NatsError,
    /// The sensor control surface is not attached to this gateway process.
    SensorUnavailable,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidUuid => "INVALID_UUID",
            Self::TrackNotFound => "TRACK_NOT_FOUND",
            Self::ProposalNotFound => "PROPOSAL_NOT_FOUND",
            Self::DecisionNotFound => "DECISION_NOT_FOUND",
            Self::EffectNotFound => "EFFECT_NOT_FOUND",
            Self::ProposalExpired => "PROPOSAL_EXPIRED",
            Self::ProposalAlreadyDecided => "PROPOSAL_ALREADY_DECIDED",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NatsError => "NATS_ERROR",
            Self::SensorUnavailable => "SENSOR_UNAVAILABLE",
        }
    }

    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::ValidationError | Self::MissingField | Self::InvalidUuid => {
                StatusCode::BAD_REQUEST
            }
            Self::TrackNotFound
            | Self::ProposalNotFound
            | Self::DecisionNotFound
            | Self::EffectNotFound => StatusCode::NOT_FOUND,
            Self::ProposalExpired | Self::ProposalAlreadyDecided => StatusCode::CONFLICT,
            Self::PolicyDenied => StatusCode::FORBIDDEN,
            Self::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NatsError => StatusCode::BAD_GATEWAY,
            Self::SensorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Error surface of every gateway endpoint. Serializes as
/// `{"error": {"code", "message", "details"}}`; server faults carry the
/// correlation id when one is known so operators can cross-reference logs.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub correlation_id: Option<Uuid>,
}

impl ApiError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    #[must_use]
    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("missing required field: {field}"))
    }

    #[must_use]
    pub fn invalid_uuid(value: &str) -> Self {
        Self::new(ErrorCode::InvalidUuid, format!("not a valid UUID: {value}"))
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::new(ErrorCode::DatabaseError, e.to_string())
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self::new(ErrorCode::NatsError, e.to_string())
    }
}

impl From<DecideError> for ApiError {
    fn from(e: DecideError) -> Self {
        match e {
            DecideError::NotFound => Self::new(ErrorCode::ProposalNotFound, "proposal not found"),
            DecideError::AlreadyDecided(status) => Self::new(
                ErrorCode::ProposalAlreadyDecided,
                format!("proposal already decided: {status}"),
            ),
            DecideError::Expired => Self::new(ErrorCode::ProposalExpired, "proposal expired"),
            DecideError::Validation(message) => Self::validation(message),
            DecideError::Store(e) => e.into(),
            DecideError::Broker(message) => Self::new(ErrorCode::NatsError, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "details": self.details,
            }
        });
        if let (Some(correlation_id), Some(obj)) = (self.correlation_id, body.as_object_mut()) {
            obj.insert(
                "correlation_id".to_string(),
                serde_json::Value::String(correlation_id.to_string()),
            );
        }
        (self.code.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorCode::ValidationError.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::ProposalNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::ProposalAlreadyDecided.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ErrorCode::ProposalExpired.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::DatabaseError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorCode::NatsError.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn decide_error_mapping() {
        let err: ApiError = DecideError::Expired.into();
        assert_eq!(err.code, ErrorCode::ProposalExpired);
        let err: ApiError =
            DecideError::AlreadyDecided(sentinel_store::ProposalStatus::Denied).into();
        assert_eq!(err.code, ErrorCode::ProposalAlreadyDecided);
        assert!(err.message.contains("denied"));
    }
}
