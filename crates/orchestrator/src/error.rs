use htlc_bridge_gateway::{ChainOperationError, RevertReason};
use htlc_bridge_liquidity::LedgerError;
use htlc_bridge_retry::RetryError;
use htlc_bridge_types::{ChainId, CommitmentError, Hashlock, SwapId, TimelockError, TokenId};
use thiserror::Error;

use crate::{RepositoryError, SwapState};

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient liquidity on {chain}/{token}: requested {requested}, available {available}")]
    InsufficientLiquidity {
        chain: ChainId,
        token: TokenId,
        requested: u128,
        available: u128,
    },

    #[error("liquidity ledger error: {0}")]
    Ledger(LedgerError),

    #[error("chain operation failed: {0}")]
    ChainOperation(#[from] ChainOperationError),

    #[error("secret does not match hashlock of swap {swap_id}")]
    SecretMismatch { swap_id: SwapId },

    #[error("timelock violation: {0}")]
    TimelockViolation(String),

    #[error("invalid timelocks: {0}")]
    InvalidTimelocks(#[from] TimelockError),

    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RecoveryExhausted { attempts: u32, last_error: String },

    #[error("capacity exceeded: {in_flight} swaps in flight (max {max})")]
    CapacityExceeded { in_flight: usize, max: usize },

    #[error("hashlock {0} is already used by an active swap")]
    DuplicateHashlock(Hashlock),

    #[error("swap not found: {0}")]
    NotFound(SwapId),

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: SwapState, to: SwapState },

    #[error("abort rejected for swap {swap_id}: {reason}")]
    AbortRejected { swap_id: SwapId, reason: String },

    #[error("swap {0} is being processed by another task")]
    Busy(SwapId),

    #[error("commitment error: {0}")]
    Commitment(#[from] CommitmentError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl SwapError {
    /// Short label for metrics and the `error_kind` log field
    pub fn kind(&self) -> &'static str {
        match self {
            SwapError::Validation(_) => "validation",
            SwapError::InsufficientLiquidity { .. } => "insufficient_liquidity",
            SwapError::Ledger(_) => "ledger",
            SwapError::ChainOperation(_) => "chain_operation",
            SwapError::SecretMismatch { .. } => "secret_mismatch",
            SwapError::TimelockViolation(_) => "timelock_violation",
            SwapError::InvalidTimelocks(_) => "invalid_timelocks",
            SwapError::RecoveryExhausted { .. } => "recovery_exhausted",
            SwapError::CapacityExceeded { .. } => "capacity_exceeded",
            SwapError::DuplicateHashlock(_) => "duplicate_hashlock",
            SwapError::NotFound(_) => "not_found",
            SwapError::InvalidTransition { .. } => "invalid_transition",
            SwapError::AbortRejected { .. } => "abort_rejected",
            SwapError::Busy(_) => "busy",
            SwapError::Commitment(_) => "commitment",
            SwapError::Repository(_) => "repository",
        }
    }

    /// Map a failed chain call, classifying escrow reverts
    pub(crate) fn from_chain(swap_id: SwapId, err: RetryError<ChainOperationError>) -> Self {
        match err {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => SwapError::RecoveryExhausted {
                attempts,
                last_error: last_error.to_string(),
            },
            RetryError::Permanent(e) => match e.revert_reason() {
                Some(RevertReason::InvalidPreimage) => SwapError::SecretMismatch { swap_id },
                Some(RevertReason::WithdrawalNotAllowed | RevertReason::CancellationNotAllowed) => {
                    SwapError::TimelockViolation(e.to_string())
                }
                _ => SwapError::ChainOperation(e),
            },
        }
    }
}

impl From<LedgerError> for SwapError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientLiquidity {
                chain,
                token,
                requested,
                available,
            } => SwapError::InsufficientLiquidity {
                chain,
                token,
                requested,
                available,
            },
            LedgerError::UnknownAsset { chain, token } => SwapError::InsufficientLiquidity {
                chain,
                token,
                requested: 0,
                available: 0,
            },
            other => SwapError::Ledger(other),
        }
    }
}

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
