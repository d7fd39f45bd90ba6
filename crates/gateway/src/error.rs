use htlc_bridge_retry::Retryable;
use htlc_bridge_types::ChainId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Reasons an escrow program rejects a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertReason {
    InvalidTimelockOrder,
    InvalidAmount,
    InvalidTokenMint,
    InvalidDestination,
    InvalidSafetyDeposit,
    WithdrawalNotAllowed,
    CancellationNotAllowed,
    AlreadyWithdrawn,
    AlreadyCancelled,
    InvalidPreimage,
    /// An escrow with the same htlc id already exists on this chain
    EscrowExists,
    UnknownEscrow,
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RevertReason::InvalidTimelockOrder => "invalid timelock order",
            RevertReason::InvalidAmount => "invalid amount",
            RevertReason::InvalidTokenMint => "invalid token mint",
            RevertReason::InvalidDestination => "invalid destination",
            RevertReason::InvalidSafetyDeposit => "invalid safety deposit",
            RevertReason::WithdrawalNotAllowed => "withdrawal not allowed in current phase",
            RevertReason::CancellationNotAllowed => "cancellation not allowed in current phase",
            RevertReason::AlreadyWithdrawn => "escrow already withdrawn",
            RevertReason::AlreadyCancelled => "escrow already cancelled",
            RevertReason::InvalidPreimage => "preimage does not match hashlock",
            RevertReason::EscrowExists => "escrow already exists",
            RevertReason::UnknownEscrow => "unknown escrow",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainOperationError {
    #[error("transport error on {chain}: {message}")]
    Transport { chain: ChainId, message: String },

    #[error("{operation} on {chain} timed out after {after:?}")]
    Timeout {
        chain: ChainId,
        operation: String,
        after: Duration,
    },

    #[error("transaction reverted on {chain}: {reason}")]
    Reverted { chain: ChainId, reason: RevertReason },

    #[error("request rejected by {chain}: {message}")]
    Rejected {
        chain: ChainId,
        message: String,
        retryable: bool,
    },
}

impl ChainOperationError {
    pub fn transport(chain: &ChainId, message: impl Into<String>) -> Self {
        Self::Transport {
            chain: chain.clone(),
            message: message.into(),
        }
    }

    pub fn reverted(chain: &ChainId, reason: RevertReason) -> Self {
        Self::Reverted {
            chain: chain.clone(),
            reason,
        }
    }

    pub fn revert_reason(&self) -> Option<RevertReason> {
        match self {
            ChainOperationError::Reverted { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn chain(&self) -> &ChainId {
        match self {
            ChainOperationError::Transport { chain, .. }
            | ChainOperationError::Timeout { chain, .. }
            | ChainOperationError::Reverted { chain, .. }
            | ChainOperationError::Rejected { chain, .. } => chain,
        }
    }

    /// Short label for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChainOperationError::Transport { .. } => "transport",
            ChainOperationError::Timeout { .. } => "timeout",
            ChainOperationError::Reverted { .. } => "reverted",
            ChainOperationError::Rejected { .. } => "rejected",
        }
    }
}

impl Retryable for ChainOperationError {
    fn is_retryable(&self) -> bool {
        match self {
            ChainOperationError::Transport { .. } | ChainOperationError::Timeout { .. } => true,
            ChainOperationError::Reverted { .. } => false,
            ChainOperationError::Rejected { retryable, .. } => *retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let chain = ChainId::new("evm");
        assert!(ChainOperationError::transport(&chain, "connection reset").is_retryable());
        assert!(ChainOperationError::Timeout {
            chain: chain.clone(),
            operation: "withdraw".into(),
            after: Duration::from_secs(5),
        }
        .is_retryable());
        assert!(!ChainOperationError::reverted(&chain, RevertReason::InvalidPreimage).is_retryable());
        assert!(!ChainOperationError::Rejected {
            chain: chain.clone(),
            message: "nonce too low".into(),
            retryable: false,
        }
        .is_retryable());
    }

    #[test]
    fn test_revert_reason_accessor() {
        let chain = ChainId::new("sol");
        let err = ChainOperationError::reverted(&chain, RevertReason::AlreadyCancelled);
        assert_eq!(err.revert_reason(), Some(RevertReason::AlreadyCancelled));
        assert_eq!(err.kind(), "reverted");
        assert_eq!(err.chain(), &chain);
        assert_eq!(
            err.to_string(),
            "transaction reverted on sol: escrow already cancelled"
        );
    }
}
