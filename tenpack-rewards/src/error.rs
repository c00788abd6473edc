//! Error types for tenpack-rewards
//!
//! Precondition failures are reported to the caller and never retried
//! automatically. Store failures abort the payout transaction as a whole.

use thiserror::Error;

/// Generic message shown for failures that must not leak internals
const GENERIC_FAILURE: &str = "Failed to apply weekly rewards";

/// Rewards engine error type
#[derive(Debug, Error)]
pub enum RewardsError {
    /// A payout row already exists for the week
    #[error("Cannot pay out week starting {0}: already paid out")]
    AlreadyPaidOut(String),

    /// The week's last millisecond has not passed yet
    #[error("Cannot pay out week starting {0}: week has not ended yet")]
    WeekNotEnded(String),

    /// Nothing eligible was submitted during the week
    #[error("Cannot pay out week starting {0}: no submissions found")]
    NoSubmissions(String),

    /// Persistence failure (includes a rolled-back payout transaction)
    #[error("Store error: {0}")]
    Store(#[from] tenpack_common::Error),
}

impl RewardsError {
    /// Business rule violation (pick another week or wait), as opposed to a store failure
    pub fn is_precondition(&self) -> bool {
        !matches!(self, RewardsError::Store(_))
    }

    /// Message safe to show to callers
    pub fn user_message(&self) -> String {
        if self.is_precondition() {
            self.to_string()
        } else {
            GENERIC_FAILURE.to_string()
        }
    }
}

/// Result type for rewards operations
pub type RewardsResult<T> = Result<T, RewardsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_messages_echo_condition() {
        let err = RewardsError::AlreadyPaidOut("2024-03-11".to_string());

        assert!(err.is_precondition());
        assert!(err.user_message().contains("already paid out"));
        assert!(RewardsError::NoSubmissions("2024-03-11".to_string())
            .user_message()
            .contains("no submissions found"));
    }

    #[test]
    fn test_store_errors_are_generic() {
        let err = RewardsError::Store(tenpack_common::Error::Internal(
            "disk I/O error at page 42".to_string(),
        ));

        assert!(!err.is_precondition());
        assert_eq!(err.user_message(), GENERIC_FAILURE);
        assert!(!err.user_message().contains("page 42"));
    }
}
