//! HTTP error envelope: `{error_code, message, request_id}` plus optional
//! context (partial trace, readiness summary).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use trellis::trace::TraceStep;
use trellis::{OrchestratorError, ReadinessSummary, RequestFailure};

/// Stable error body for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error_code: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace_steps: Vec<TraceStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessSummary>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub envelope: ErrorEnvelope,
}

impl ApiError {
    /// Maps an orchestrator error to its one HTTP status.
    pub fn status_for(error: &OrchestratorError) -> StatusCode {
        match error {
            OrchestratorError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::NotRegistered(_) => StatusCode::NOT_FOUND,
            OrchestratorError::PolicyDenied(_) => StatusCode::FORBIDDEN,
            OrchestratorError::Blocked(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::Timeout { .. } | OrchestratorError::Cancelled => {
                StatusCode::GATEWAY_TIMEOUT
            }
            OrchestratorError::Unreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::Tool { .. }
            | OrchestratorError::Llm(_)
            | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn from_failure(failure: RequestFailure) -> Self {
        let readiness = match &failure.error {
            OrchestratorError::Blocked(summary) => Some(summary.clone()),
            _ => None,
        };
        Self {
            status: Self::status_for(&failure.error),
            envelope: ErrorEnvelope {
                error_code: failure.error.error_code().to_string(),
                message: public_message(&failure.error),
                request_id: failure.request_id,
                trace_steps: failure.trace_steps,
                readiness,
            },
        }
    }

    pub fn overloaded(request_id: String) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            envelope: ErrorEnvelope {
                error_code: "overloaded".into(),
                message: "too many concurrent requests".into(),
                request_id,
                trace_steps: Vec::new(),
                readiness: None,
            },
        }
    }

    pub fn bad_request(request_id: String, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            envelope: ErrorEnvelope {
                error_code: "invalid_identifier".into(),
                message: message.into(),
                request_id,
                trace_steps: Vec::new(),
                readiness: None,
            },
        }
    }
}

/// Internal errors never leak details to the client.
fn public_message(error: &OrchestratorError) -> String {
    match error {
        OrchestratorError::Internal(_) | OrchestratorError::Llm(_) => "internal error".to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!(self.envelope))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: each taxonomy kind maps to its documented status code.
    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::status_for(&OrchestratorError::InvalidIdentifier("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::status_for(&OrchestratorError::NotRegistered("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::status_for(&OrchestratorError::PolicyDenied("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::status_for(&OrchestratorError::Blocked(ReadinessSummary::default())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::status_for(&OrchestratorError::Timeout {
                scope: "request",
                secs: 120
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::status_for(&OrchestratorError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    /// **Scenario**: internal details are not echoed to the client.
    #[test]
    fn internal_messages_are_masked() {
        assert_eq!(
            public_message(&OrchestratorError::Internal("secret stack".into())),
            "internal error"
        );
        assert!(public_message(&OrchestratorError::NotRegistered("kgx".into())).contains("kgx"));
    }

    /// **Scenario**: a blocked failure carries the readiness summary in the body.
    #[test]
    fn blocked_failure_includes_readiness() {
        let failure = RequestFailure {
            request_id: "r1".into(),
            error: OrchestratorError::Blocked(ReadinessSummary::default()),
            trace_steps: Vec::new(),
        };
        let api = ApiError::from_failure(failure);
        assert!(api.envelope.readiness.is_some());
        assert_eq!(api.envelope.error_code, "blocked");
    }
}
