//! # API Error Type
//!
//! Unified error type for HTTP handlers.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Flow in the API                           │
//! │                                                                         │
//! │  Handler                                                                │
//! │  Result<Json<T>, ApiError>                                              │
//! │       │                                                                 │
//! │       ├── IssueError::Validation ───────────► 422 validation           │
//! │       ├── malformed access key ─────────────► 400 malformed_access_key │
//! │       ├── IssueError::Certificate ──────────► 422 certificate          │
//! │       ├── IssueError::Rejected ─────────────► 422 rejected + details   │
//! │       ├── IssueError::Transmission ─────────► 503 transmission         │
//! │       ├── IssueError::OutcomeUnknown ───────► 202 outcome_unknown      │
//! │       ├── IssueError::NotFound ─────────────► 404 not_found            │
//! │       ├── IssueError::InvalidState ─────────► 409 invalid_state        │
//! │       └── Storage / Render / Signing / ... ─► 500                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Body
//! ```json
//! {
//!   "error": {
//!     "code": "rejected",
//!     "message": "Rejected by the authority (539, duplicidade): ...",
//!     "details": { "status_code": 539, "category": "duplicidade", "reason": "..." }
//!   }
//! }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use nfe_db::DbError;
use nfe_sefaz::{ErrorCategory, IssueError};

/// Error returned by every handler.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,

    /// Machine-readable code, snake_case.
    pub code: &'static str,

    /// Human-readable message.
    pub message: String,

    pub details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// A path key that is not a well-formed access key.
    pub fn malformed_key(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "malformed_access_key", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        let message = err.to_string();
        match err {
            IssueError::Rejected {
                code,
                category,
                reason,
                remediation,
            } => ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "rejected", message).with_details(
                json!({
                    "status_code": code,
                    "category": category.as_str(),
                    "reason": reason,
                    "remediation": remediation,
                }),
            ),
            IssueError::OutcomeUnknown {
                access_key,
                receipt,
            } => ApiError::new(StatusCode::ACCEPTED, "outcome_unknown", message).with_details(
                json!({ "access_key": access_key, "receipt": receipt }),
            ),
            IssueError::Transmission { retryable, .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "transmission", message)
                    .with_details(json!({ "retryable": retryable }))
            }
            IssueError::NotFound { entity, id } => {
                ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
                    .with_details(json!({ "entity": entity, "id": id }))
            }
            other => {
                let category = other.category();
                let status = match category {
                    ErrorCategory::Validation | ErrorCategory::Certificate => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    ErrorCategory::InvalidState => StatusCode::CONFLICT,
                    _ => {
                        tracing::error!(category = %category, error = %message, "Request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                ApiError::new(status, category.as_str(), message)
            }
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        IssueError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: &self.message,
                details: self.details.as_ref(),
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use nfe_core::{RejectionCategory, ValidationError};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                IssueError::Validation(ValidationError::required("items")),
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation",
            ),
            (
                IssueError::certificate("t", "expired"),
                StatusCode::UNPROCESSABLE_ENTITY,
                "certificate",
            ),
            (
                IssueError::transmission("timeout", true),
                StatusCode::SERVICE_UNAVAILABLE,
                "transmission",
            ),
            (
                IssueError::not_found("Document", "k"),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                IssueError::InvalidState("already cancelled".into()),
                StatusCode::CONFLICT,
                "invalid_state",
            ),
            (
                IssueError::Storage("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage",
            ),
            (
                IssueError::Render("font".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "render",
            ),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn test_rejection_details() {
        let api = ApiError::from(IssueError::Rejected {
            code: 539,
            category: RejectionCategory::Duplicidade,
            reason: "Rejeicao: Duplicidade de NF-e".into(),
            remediation: String::new(),
        });
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);
        let details = api.details.unwrap();
        assert_eq!(details["status_code"], 539);
        assert_eq!(details["reason"], "Rejeicao: Duplicidade de NF-e");
    }

    #[test]
    fn test_unknown_outcome_is_accepted() {
        let api = ApiError::from(IssueError::OutcomeUnknown {
            access_key: "35240311222333000181550010000000421123456780".into(),
            receipt: Some("351000000000555".into()),
        });
        assert_eq!(api.status, StatusCode::ACCEPTED);
        assert_eq!(api.details.unwrap()["receipt"], "351000000000555");
    }
}
