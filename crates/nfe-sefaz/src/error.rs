//! # Issuance Error Types
//!
//! Error types for the issuance engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Issuance Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Before network │  │   Network       │  │     Authority           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  Transmission   │  │  Rejected               │ │
//! │  │  Certificate    │  │  OutcomeUnknown │  │  (code + category +     │ │
//! │  │  Signing        │  │                 │  │   reason, verbatim)     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Artifacts    │  │     Lookup      │  │      Setup              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Storage        │  │  NotFound       │  │  Config                 │ │
//! │  │  Render         │  │  InvalidState   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only network failures are retryable. A rejection is final: the document
//! keeps its number and a new document is needed.

use serde::Serialize;
use thiserror::Error;

use crate::certificate::CertificateStoreError;
use nfe_core::{CoreError, RejectionCategory, ValidationError};
use nfe_db::DbError;

/// Result type alias for issuance operations.
pub type IssueResult<T> = Result<T, IssueError>;

// =============================================================================
// Error Category
// =============================================================================

/// Stable category names surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Certificate,
    Signing,
    Transmission,
    Rejected,
    Storage,
    Render,
    NotFound,
    InvalidState,
    Config,
}

impl ErrorCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Certificate => "certificate",
            ErrorCategory::Signing => "signing",
            ErrorCategory::Transmission => "transmission",
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Render => "render",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidState => "invalid_state",
            ErrorCategory::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Issue Error
// =============================================================================

/// Issuance error covering every failure of the pipeline and events.
#[derive(Debug, Error)]
pub enum IssueError {
    // =========================================================================
    // Before Network
    // =========================================================================
    /// Order or event data failed a fiscal rule.
    ///
    /// ## When This Occurs
    /// - Invalid CNPJ/CPF check digits
    /// - Empty item list, unpaid total
    /// - Justification shorter than 15 characters
    /// - Document environment disagrees with the authority URL
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Tenant certificate missing, unreadable or opened with the wrong passphrase.
    #[error("Certificate error for tenant {tenant_id}: {reason}")]
    Certificate { tenant_id: String, reason: String },

    /// Canonicalization or signature failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    // =========================================================================
    // Network
    // =========================================================================
    /// The authority could not be reached or answered with an HTTP failure.
    #[error("Transmission failed: {reason}")]
    Transmission { reason: String, retryable: bool },

    /// The authority was reached but has not produced a final answer yet.
    ///
    /// The document may or may not be authorized. Reconciliation with the
    /// same receipt (or the access key) is always safe.
    #[error("Outcome unknown for {access_key}, must poll again later")]
    OutcomeUnknown {
        access_key: String,
        receipt: Option<String>,
    },

    // =========================================================================
    // Authority
    // =========================================================================
    /// The authority rejected the document or event.
    #[error("Rejected by the authority ({code}, {category}): {reason}")]
    Rejected {
        code: u16,
        category: RejectionCategory,
        reason: String,
        remediation: String,
    },

    // =========================================================================
    // Artifacts
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    /// DANFE rendering failed.
    #[error("Render error: {0}")]
    Render(String),

    // =========================================================================
    // Lookup & State
    // =========================================================================
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The document is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IssueError {
    pub fn certificate(tenant_id: impl Into<String>, reason: impl Into<String>) -> Self {
        IssueError::Certificate {
            tenant_id: tenant_id.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        IssueError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn transmission(reason: impl Into<String>, retryable: bool) -> Self {
        IssueError::Transmission {
            reason: reason.into(),
            retryable,
        }
    }

    /// Stable category for callers and logs.
    pub fn category(&self) -> ErrorCategory {
        match self {
            IssueError::Validation(_) => ErrorCategory::Validation,
            IssueError::Certificate { .. } => ErrorCategory::Certificate,
            IssueError::Signing(_) => ErrorCategory::Signing,
            IssueError::Transmission { .. } | IssueError::OutcomeUnknown { .. } => {
                ErrorCategory::Transmission
            }
            IssueError::Rejected { .. } => ErrorCategory::Rejected,
            IssueError::Storage(_) => ErrorCategory::Storage,
            IssueError::Render(_) => ErrorCategory::Render,
            IssueError::NotFound { .. } => ErrorCategory::NotFound,
            IssueError::InvalidState(_) => ErrorCategory::InvalidState,
            IssueError::Config(_) => ErrorCategory::Config,
        }
    }

    /// Returns true if the same request may be tried again.
    ///
    /// ## Retryable Errors
    /// - Connection failures, timeouts, HTTP 5xx
    /// - Unknown outcomes (reconcile, never re-issue)
    ///
    /// ## Non-Retryable Errors
    /// - Anything the authority answered with a status code
    /// - Validation, certificate and signing failures
    pub fn is_retryable(&self) -> bool {
        match self {
            IssueError::Transmission { retryable, .. } => *retryable,
            IssueError::OutcomeUnknown { .. } => true,
            _ => false,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for IssueError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(inner) => IssueError::Validation(inner),
            CoreError::CorrectionOutOfSequence {
                expected,
                requested,
            } => IssueError::Validation(ValidationError::invalid_format(
                "sequence",
                format!("expected {}, got {}", expected, requested),
            )),
            other => IssueError::InvalidState(other.to_string()),
        }
    }
}

impl From<DbError> for IssueError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => IssueError::NotFound { entity, id },
            DbError::Conflict { reason, .. } => IssueError::InvalidState(reason),
            DbError::UniqueViolation { field, value } => IssueError::InvalidState(format!(
                "concurrent update: {} '{}' already exists",
                field, value
            )),
            other => IssueError::Storage(other.to_string()),
        }
    }
}

impl From<CertificateStoreError> for IssueError {
    fn from(err: CertificateStoreError) -> Self {
        match err {
            CertificateStoreError::NotFound { tenant_id } => {
                IssueError::not_found("Certificate", tenant_id)
            }
            CertificateStoreError::Invalid { tenant_id, reason } => {
                IssueError::Certificate { tenant_id, reason }
            }
            CertificateStoreError::Upload { reason } => IssueError::Validation(
                ValidationError::invalid_format("certificate", reason),
            ),
            CertificateStoreError::InvalidTenantId(id) => IssueError::Validation(
                ValidationError::invalid_format("tenant_id", format!("'{}' is not allowed", id)),
            ),
            CertificateStoreError::Io(e) => IssueError::Storage(e.to_string()),
            CertificateStoreError::Metadata(e) => IssueError::Storage(e.to_string()),
        }
    }
}

impl From<std::io::Error> for IssueError {
    fn from(err: std::io::Error) -> Self {
        IssueError::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for IssueError {
    fn from(err: toml::de::Error) -> Self {
        IssueError::Config(err.to_string())
    }
}

impl From<url::ParseError> for IssueError {
    fn from(err: url::ParseError) -> Self {
        IssueError::Config(format!("invalid URL: {}", err))
    }
}

impl From<quick_xml::Error> for IssueError {
    fn from(err: quick_xml::Error) -> Self {
        IssueError::transmission(format!("malformed authority response: {}", err), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(IssueError::transmission("connection refused", true).is_retryable());
        assert!(IssueError::OutcomeUnknown {
            access_key: "k".into(),
            receipt: Some("351000000000001".into()),
        }
        .is_retryable());

        assert!(!IssueError::transmission("HTTP 400", false).is_retryable());
        assert!(!IssueError::Rejected {
            code: 539,
            category: RejectionCategory::Duplicidade,
            reason: "Duplicidade de NF-e".into(),
            remediation: String::new(),
        }
        .is_retryable());
        assert!(!IssueError::Signing("bad key".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            IssueError::OutcomeUnknown {
                access_key: "k".into(),
                receipt: None
            }
            .category(),
            ErrorCategory::Transmission
        );
        assert_eq!(
            IssueError::from(ValidationError::required("items")).category(),
            ErrorCategory::Validation
        );
        assert_eq!(ErrorCategory::NotFound.as_str(), "not_found");
    }

    #[test]
    fn test_core_error_mapping() {
        let err: IssueError = CoreError::CorrectionOutOfSequence {
            expected: 3,
            requested: 5,
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err: IssueError = CoreError::AlreadyCancelled {
            access_key: "k".into(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::InvalidState);
    }

    #[test]
    fn test_db_not_found_mapping() {
        let err: IssueError = DbError::not_found("Document", "abc").into();
        assert!(matches!(err, IssueError::NotFound { ref entity, .. } if entity == "Document"));
    }

    #[test]
    fn test_rejected_display_keeps_reason() {
        let err = IssueError::Rejected {
            code: 999,
            category: RejectionCategory::Outros,
            reason: "Rejeicao: motivo original".into(),
            remediation: String::new(),
        };
        assert!(err.to_string().contains("Rejeicao: motivo original"));
    }
}
