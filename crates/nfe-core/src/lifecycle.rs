//! # Document Lifecycle
//!
//! The status state machine and the rules that guard post-authorization
//! events.
//!
//! ## State Machine
//! ```text
//!  Draft ──► Assembled ──► Signed ──► Submitted ──┬──► Authorized ──┬──► Cancelled (terminal)
//!                                       │         │        │        │
//!                                       ▼         │        ▼        │
//!                                  Processing ────┤    Corrected ───┘
//!                                                 │    (repeats, n+1)
//!                                                 └──► Rejected (terminal, new number required)
//! ```
//!
//! `Corrected` keeps the authorization valid: a corrected document can be
//! corrected again or cancelled.

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::DocumentStatus;
use crate::MAX_CORRECTION_SEQUENCE;

use DocumentStatus::*;

/// Whether `from → to` is an allowed transition.
pub fn can_transition(from: DocumentStatus, to: DocumentStatus) -> bool {
    matches!(
        (from, to),
        (Draft, Assembled)
            | (Assembled, Signed)
            | (Signed, Submitted)
            | (Submitted, Processing)
            | (Submitted, Authorized)
            | (Submitted, Rejected)
            | (Processing, Processing)
            | (Processing, Authorized)
            | (Processing, Rejected)
            | (Authorized, Cancelled)
            | (Authorized, Corrected)
            | (Corrected, Corrected)
            | (Corrected, Cancelled)
    )
}

/// Returns `to` when the transition is allowed.
///
/// ## Example
/// ```rust
/// use nfe_core::lifecycle::transition;
/// use nfe_core::types::DocumentStatus;
///
/// assert!(transition(DocumentStatus::Authorized, DocumentStatus::Cancelled).is_ok());
/// assert!(transition(DocumentStatus::Rejected, DocumentStatus::Cancelled).is_err());
/// ```
pub fn transition(from: DocumentStatus, to: DocumentStatus) -> CoreResult<DocumentStatus> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

/// Checks a document can receive a cancellation event.
pub fn ensure_cancellable(status: DocumentStatus, access_key: &str) -> CoreResult<()> {
    if status == Cancelled {
        return Err(CoreError::AlreadyCancelled {
            access_key: access_key.to_string(),
        });
    }
    transition(status, Cancelled).map(|_| ())
}

/// Checks a document can receive a correction letter.
pub fn ensure_correctable(status: DocumentStatus) -> CoreResult<()> {
    transition(status, Corrected).map(|_| ())
}

/// Checks `requested` is exactly the next correction sequence.
///
/// ```text
/// last = None    → requested must be 1
/// last = Some(m) → requested must be m + 1 (and ≤ 20)
/// ```
pub fn check_correction_sequence(last: Option<u32>, requested: u32) -> CoreResult<()> {
    let expected = last.unwrap_or(0) + 1;
    if requested != expected {
        return Err(CoreError::CorrectionOutOfSequence {
            expected,
            requested,
        });
    }
    if requested > MAX_CORRECTION_SEQUENCE {
        return Err(crate::error::ValidationError::OutOfRange {
            field: "sequence".to_string(),
            min: 1,
            max: MAX_CORRECTION_SEQUENCE as i64,
        }
        .into());
    }
    Ok(())
}

/// Rejects a cancellation once the window after authorization has elapsed.
pub fn ensure_within_cancellation_window(
    authorized_at: DateTime<Utc>,
    now: DateTime<Utc>,
    window_hours: i64,
) -> CoreResult<()> {
    let elapsed = now.signed_duration_since(authorized_at);
    if elapsed > chrono::Duration::hours(window_hours) {
        return Err(CoreError::CancellationWindowElapsed {
            window_hours,
            elapsed_hours: elapsed.num_hours(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const ALL: [DocumentStatus; 9] = [
        Draft, Assembled, Signed, Submitted, Processing, Authorized, Rejected, Cancelled,
        Corrected,
    ];

    #[test]
    fn test_happy_path() {
        let mut status = Draft;
        for next in [Assembled, Signed, Submitted, Authorized] {
            status = transition(status, next).unwrap();
        }
        assert_eq!(status, Authorized);
    }

    #[test]
    fn test_from_authorized_only_events() {
        for to in ALL {
            let allowed = can_transition(Authorized, to);
            assert_eq!(allowed, matches!(to, Cancelled | Corrected), "{:?}", to);
        }
    }

    #[test]
    fn test_events_unreachable_from_draft_and_rejected() {
        for from in [Draft, Rejected] {
            assert!(!can_transition(from, Cancelled));
            assert!(!can_transition(from, Corrected));
        }
    }

    #[test]
    fn test_cancelled_is_terminal() {
        for to in ALL {
            assert!(!can_transition(Cancelled, to));
        }
        assert!(matches!(
            ensure_cancellable(Cancelled, "k"),
            Err(CoreError::AlreadyCancelled { .. })
        ));
    }

    #[test]
    fn test_corrected_stays_authorized() {
        assert!(ensure_correctable(Corrected).is_ok());
        assert!(ensure_cancellable(Corrected, "k").is_ok());
        assert!(Corrected.is_authorized());
    }

    #[test]
    fn test_correction_sequence() {
        assert!(check_correction_sequence(None, 1).is_ok());
        assert!(check_correction_sequence(None, 2).is_err());
        assert!(check_correction_sequence(Some(2), 3).is_ok());
        assert!(check_correction_sequence(Some(2), 2).is_err());
        assert!(check_correction_sequence(Some(2), 4).is_err());
        assert!(check_correction_sequence(Some(20), 21).is_err());
    }

    #[test]
    fn test_cancellation_window() {
        let authorized = Utc::now();
        assert!(ensure_within_cancellation_window(authorized, authorized + Duration::hours(23), 24).is_ok());
        let err = ensure_within_cancellation_window(authorized, authorized + Duration::hours(30), 24)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::CancellationWindowElapsed { window_hours: 24, elapsed_hours: 30 }
        ));
    }

    proptest::proptest! {
        #[test]
        fn prop_sequence_accepts_only_next(last in proptest::option::of(0u32..20), requested in 0u32..25) {
            let ok = check_correction_sequence(last, requested).is_ok();
            proptest::prop_assert_eq!(ok, requested == last.unwrap_or(0) + 1);
        }
    }
}
