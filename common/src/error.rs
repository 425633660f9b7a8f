//! Error types for DuelSettle operations.

use crate::{Address, Amount, OperationKind, RoundId, RoundState};
use thiserror::Error;

/// Request validation failures. Raised before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Stake must be positive.
    #[error("Stake must be greater than zero")]
    ZeroStake,

    /// Entering stake differs from the round's stake.
    #[error("Stake mismatch: round requires {expected}, got {actual}")]
    StakeMismatch { expected: Amount, actual: Amount },

    /// Creator tried to enter their own round.
    #[error("Creator {0} cannot enter their own round")]
    SelfMatch(Address),

    /// The configured fee cannot be paid out of this round's pot.
    #[error("Fee {fee} exceeds pot {pot}")]
    FeeExceedsPot { fee: Amount, pot: Amount },

    /// Address is malformed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Amount must be positive.
    #[error("Amount must be greater than zero")]
    ZeroAmount,
}

/// Main error type for DuelSettle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DuelError {
    /// Invalid request.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Account cannot cover the debit.
    #[error("Insufficient funds for {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: Address,
        required: Amount,
        available: Amount,
    },

    /// Round not found.
    #[error("Round not found: {0}")]
    RoundNotFound(RoundId),

    /// Operation not legal from the round's current state.
    #[error("Cannot {operation} round {round_id} in state {state}")]
    InvalidState {
        round_id: RoundId,
        state: RoundState,
        operation: OperationKind,
    },

    /// Lost a race for a state transition.
    #[error("Conflicting {operation} on round {round_id}")]
    Conflict {
        round_id: RoundId,
        operation: OperationKind,
    },

    /// Caller may not perform the operation.
    #[error("{caller} is not authorized to {operation} round {round_id}")]
    Unauthorized {
        caller: Address,
        round_id: RoundId,
        operation: OperationKind,
    },

    /// Arithmetic would overflow.
    #[error("Amount overflow: {0}")]
    Overflow(String),

    /// Gateway call did not confirm within bound.
    #[error("External call timed out: {operation} after {waited_ms}ms")]
    ExternalTimeout { operation: String, waited_ms: u64 },

    /// Gateway rejected or failed a call.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DuelError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DuelError::ExternalTimeout { .. } | DuelError::Conflict { .. } | DuelError::Gateway(_)
        )
    }

    /// Get error code for gateway responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            DuelError::Validation(ValidationError::ZeroStake) => "ZERO_STAKE",
            DuelError::Validation(ValidationError::StakeMismatch { .. }) => "STAKE_MISMATCH",
            DuelError::Validation(ValidationError::SelfMatch(_)) => "SELF_MATCH",
            DuelError::Validation(ValidationError::FeeExceedsPot { .. }) => "FEE_EXCEEDS_POT",
            DuelError::Validation(ValidationError::InvalidAddress(_)) => "INVALID_ADDRESS",
            DuelError::Validation(ValidationError::ZeroAmount) => "ZERO_AMOUNT",
            DuelError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            DuelError::RoundNotFound(_) => "ROUND_NOT_FOUND",
            DuelError::InvalidState { .. } => "INVALID_STATE",
            DuelError::Conflict { .. } => "CONFLICT",
            DuelError::Unauthorized { .. } => "UNAUTHORIZED",
            DuelError::Overflow(_) => "OVERFLOW",
            DuelError::ExternalTimeout { .. } => "EXTERNAL_TIMEOUT",
            DuelError::Gateway(_) => "GATEWAY_ERROR",
            DuelError::Configuration(_) => "CONFIGURATION_ERROR",
            DuelError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for DuelSettle operations.
pub type Result<T> = std::result::Result<T, DuelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_converts() {
        let err: DuelError = ValidationError::ZeroStake.into();
        assert!(matches!(err, DuelError::Validation(ValidationError::ZeroStake)));
        assert_eq!(err.error_code(), "ZERO_STAKE");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        let timeout = DuelError::ExternalTimeout {
            operation: "end_round".to_string(),
            waited_ms: 30_000,
        };
        assert!(timeout.is_retryable());

        let not_found = DuelError::RoundNotFound(RoundId::new(3));
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = DuelError::InvalidState {
            round_id: RoundId::new(1),
            state: RoundState::Matched,
            operation: OperationKind::Cancel,
        };
        assert_eq!(err.to_string(), "Cannot cancel round 1 in state MATCHED");
    }
}
