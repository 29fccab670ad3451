//! # Error Types
//!
//! Domain-specific error types for nfe-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  nfe-core errors (this file)                                           │
//! │  ├── CoreError        - State machine / business rule violations       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  nfe-db errors (separate crate)                                        │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  nfe-sefaz errors (separate crate)                                     │
//! │  └── IssueError       - Validation/Certificate/Signing/Transmission/   │
//! │                         Rejected/Storage/Render taxonomy               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → IssueError → ApiError → Client    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (access key, field, etc.)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

use crate::types::DocumentStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent fiscal rule violations detected before any
/// network traffic happens.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A status transition outside the document state machine.
    ///
    /// ## When This Occurs
    /// - Cancelling a document that was never authorized
    /// - Correcting a cancelled document
    /// - Re-submitting a rejected document (a new number is required)
    #[error("Document cannot move from {from} to {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// The document already has a registered cancellation.
    #[error("Document {access_key} is already cancelled")]
    AlreadyCancelled { access_key: String },

    /// Correction sequence is not exactly `last + 1`.
    ///
    /// ## User Workflow
    /// ```text
    /// Last registered correction: 2
    ///      │
    ///      ▼
    /// correct(seq = 4)
    ///      │
    ///      ▼
    /// CorrectionOutOfSequence { expected: 3, requested: 4 }
    /// ```
    #[error("Correction sequence {requested} is out of order, expected {expected}")]
    CorrectionOutOfSequence { expected: u32, requested: u32 },

    /// Cancellation attempted after the allowed window.
    #[error("Cancellation window of {window_hours}h elapsed {elapsed_hours}h after authorization")]
    CancellationWindowElapsed {
        window_hours: i64,
        elapsed_hours: i64,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when order data doesn't meet fiscal requirements.
/// Used for early validation before any document is assembled.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., non-digit characters in a key).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Check digits do not match (tax ids, access key).
    #[error("{field} '{value}' has invalid check digits")]
    InvalidCheckDigit { field: String, value: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Document environment disagrees with the transmission target.
    #[error("Document environment {document} does not match transmission target {target}")]
    EnvironmentMismatch { document: String, target: String },
}

impl ValidationError {
    /// Creates a Required error for the given field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates an InvalidFormat error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::CorrectionOutOfSequence {
            expected: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Correction sequence 5 is out of order, expected 3"
        );

        let err = CoreError::InvalidTransition {
            from: DocumentStatus::Draft,
            to: DocumentStatus::Cancelled,
        };
        assert_eq!(err.to_string(), "Document cannot move from draft to cancelled");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::required("emitter.tax_id");
        assert_eq!(err.to_string(), "emitter.tax_id is required");

        let err = ValidationError::TooShort {
            field: "justification".to_string(),
            min: 15,
        };
        assert_eq!(err.to_string(), "justification must be at least 15 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::required("items");
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
