//! Swap orchestration for the HTLC bridge coordinator
//!
//! - `SwapOrchestrator`: admits swaps, drives each through escrow creation,
//!   reveal and withdrawal, and unwinds through cancellation on failure
//! - `SwapRepository`: swap persistence and transition history
//! - Recovery sweep for swaps whose processing stalled

pub mod config;
mod driver;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod repository;
pub mod state;

#[cfg(test)]
mod tests;

pub use config::OrchestratorConfig;
pub use error::{BuilderError, SwapError};
pub use orchestrator::{SwapOrchestrator, SwapOrchestratorBuilder};
pub use recovery::{RecoveryAction, SweepReport};
pub use repository::{
    InMemorySwapRepository, RepositoryError, ScanFilter, StateTransition, SwapRepository,
};
pub use state::{
    EscrowLeg, Leg, LegOutcome, SealedSecret, Swap, SwapPhase, SwapRequest, SwapState, Unwind,
};
