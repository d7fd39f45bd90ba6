use htlc_bridge_types::{ChainId, SwapId, TokenId};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient liquidity on {chain}/{token}: requested {requested}, available {available}")]
    InsufficientLiquidity {
        chain: ChainId,
        token: TokenId,
        requested: u128,
        available: u128,
    },

    #[error("no liquidity record for {chain}/{token}")]
    UnknownAsset { chain: ChainId, token: TokenId },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("swap {swap_id} already holds a reservation on {chain}/{token}")]
    DuplicateReservation {
        swap_id: SwapId,
        chain: ChainId,
        token: TokenId,
    },

    #[error("balance overflow on {chain}/{token}")]
    Overflow { chain: ChainId, token: TokenId },

    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),
}
