use htlc_bridge_types::{
    ChainId, EscrowRef, Hashlock, HtlcId, Secret, SecretVault, SwapId, Timelocks, TokenId, TxHash,
};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::SwapError;

// ═══════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapState {
    Pending,
    SourceLocked,
    DestinationLocked,
    Withdrawing,
    Completed,
    Failed,
    Refunded,
}

impl SwapState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::Completed | SwapState::Failed | SwapState::Refunded
        )
    }

    /// The transition table. Every pair is listed so adding a state forces a
    /// decision for each edge.
    pub fn can_transition_to(&self, next: SwapState) -> bool {
        use SwapState::*;
        match (self, next) {
            (Pending, SourceLocked) | (Pending, Failed) => true,
            (Pending, Pending | DestinationLocked | Withdrawing | Completed | Refunded) => false,

            (SourceLocked, DestinationLocked) | (SourceLocked, Failed) | (SourceLocked, Refunded) => {
                true
            }
            (SourceLocked, Pending | SourceLocked | Withdrawing | Completed) => false,

            (DestinationLocked, Withdrawing)
            | (DestinationLocked, Failed)
            | (DestinationLocked, Refunded) => true,
            (DestinationLocked, Pending | SourceLocked | DestinationLocked | Completed) => false,

            (Withdrawing, Completed) | (Withdrawing, Failed) | (Withdrawing, Refunded) => true,
            (Withdrawing, Pending | SourceLocked | DestinationLocked | Withdrawing) => false,

            (Completed | Failed | Refunded, _) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapState::Pending => "pending",
            SwapState::SourceLocked => "source_locked",
            SwapState::DestinationLocked => "destination_locked",
            SwapState::Withdrawing => "withdrawing",
            SwapState::Completed => "completed",
            SwapState::Failed => "failed",
            SwapState::Refunded => "refunded",
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which escrow of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Source,
    Destination,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Source => f.write_str("source"),
            Leg::Destination => f.write_str("destination"),
        }
    }
}

/// How an escrow was settled on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LegOutcome {
    Withdrawn { tx_hash: Option<TxHash> },
    Cancelled { tx_hash: Option<TxHash> },
}

/// One created escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowLeg {
    pub chain: ChainId,
    pub escrow_ref: EscrowRef,
    /// `None` when the escrow was adopted after its receipt was lost
    pub create_tx: Option<TxHash>,
    pub timelocks: Timelocks,
    pub outcome: Option<LegOutcome>,
}

impl EscrowLeg {
    pub fn is_withdrawn(&self) -> bool {
        matches!(self.outcome, Some(LegOutcome::Withdrawn { .. }))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Some(LegOutcome::Cancelled { .. }))
    }

    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}

/// State together with the escrows that exist in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapPhase {
    Pending,
    SourceLocked {
        source: EscrowLeg,
    },
    DestinationLocked {
        source: EscrowLeg,
        destination: EscrowLeg,
    },
    Withdrawing {
        source: EscrowLeg,
        destination: EscrowLeg,
    },
    Completed {
        source: EscrowLeg,
        destination: EscrowLeg,
    },
    Failed {
        source: Option<EscrowLeg>,
        destination: Option<EscrowLeg>,
    },
    Refunded {
        source: EscrowLeg,
        destination: Option<EscrowLeg>,
    },
}

impl SwapPhase {
    pub fn state(&self) -> SwapState {
        match self {
            SwapPhase::Pending => SwapState::Pending,
            SwapPhase::SourceLocked { .. } => SwapState::SourceLocked,
            SwapPhase::DestinationLocked { .. } => SwapState::DestinationLocked,
            SwapPhase::Withdrawing { .. } => SwapState::Withdrawing,
            SwapPhase::Completed { .. } => SwapState::Completed,
            SwapPhase::Failed { .. } => SwapState::Failed,
            SwapPhase::Refunded { .. } => SwapState::Refunded,
        }
    }

    pub fn source(&self) -> Option<&EscrowLeg> {
        match self {
            SwapPhase::Pending => None,
            SwapPhase::SourceLocked { source }
            | SwapPhase::DestinationLocked { source, .. }
            | SwapPhase::Withdrawing { source, .. }
            | SwapPhase::Completed { source, .. }
            | SwapPhase::Refunded { source, .. } => Some(source),
            SwapPhase::Failed { source, .. } => source.as_ref(),
        }
    }

    pub fn destination(&self) -> Option<&EscrowLeg> {
        match self {
            SwapPhase::Pending | SwapPhase::SourceLocked { .. } => None,
            SwapPhase::DestinationLocked { destination, .. }
            | SwapPhase::Withdrawing { destination, .. }
            | SwapPhase::Completed { destination, .. } => Some(destination),
            SwapPhase::Failed { destination, .. } | SwapPhase::Refunded { destination, .. } => {
                destination.as_ref()
            }
        }
    }

    pub fn leg(&self, leg: Leg) -> Option<&EscrowLeg> {
        match leg {
            Leg::Source => self.source(),
            Leg::Destination => self.destination(),
        }
    }

    pub fn leg_mut(&mut self, leg: Leg) -> Option<&mut EscrowLeg> {
        match (self, leg) {
            (SwapPhase::Pending, _) => None,
            (SwapPhase::SourceLocked { source }, Leg::Source)
            | (SwapPhase::DestinationLocked { source, .. }, Leg::Source)
            | (SwapPhase::Withdrawing { source, .. }, Leg::Source)
            | (SwapPhase::Completed { source, .. }, Leg::Source)
            | (SwapPhase::Refunded { source, .. }, Leg::Source) => Some(source),
            (SwapPhase::Failed { source, .. }, Leg::Source) => source.as_mut(),
            (SwapPhase::SourceLocked { .. }, Leg::Destination) => None,
            (SwapPhase::DestinationLocked { destination, .. }, Leg::Destination)
            | (SwapPhase::Withdrawing { destination, .. }, Leg::Destination)
            | (SwapPhase::Completed { destination, .. }, Leg::Destination) => Some(destination),
            (SwapPhase::Failed { destination, .. }, Leg::Destination)
            | (SwapPhase::Refunded { destination, .. }, Leg::Destination) => destination.as_mut(),
        }
    }

    /// Created escrows, source first
    pub fn legs(&self) -> Vec<(Leg, &EscrowLeg)> {
        let mut legs = Vec::with_capacity(2);
        if let Some(source) = self.source() {
            legs.push((Leg::Source, source));
        }
        if let Some(destination) = self.destination() {
            legs.push((Leg::Destination, destination));
        }
        legs
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECRET HANDLING
// ═══════════════════════════════════════════════════════════════════════════

/// Swap preimage that stays out of logs and serialized output until the
/// first withdrawal call reveals it on chain
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    secret: Secret,
    revealed: bool,
}

impl SealedSecret {
    pub fn new(secret: Secret) -> Self {
        Self {
            secret,
            revealed: false,
        }
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    /// Mark the secret as public. Called right before the first withdraw.
    pub fn reveal(&mut self) -> &Secret {
        self.revealed = true;
        &self.secret
    }

    /// Access for chain calls and commitment checks; never for display
    pub(crate) fn secret(&self) -> &Secret {
        &self.secret
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revealed {
            f.write_str("Secret(<revealed>)")
        } else {
            f.write_str("Secret(<sealed>)")
        }
    }
}

impl Serialize for SealedSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.revealed {
            serializer.serialize_some(&self.secret.to_hex())
        } else {
            serializer.serialize_none()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SWAP RECORD
// ═══════════════════════════════════════════════════════════════════════════

/// Caller-supplied terms of a swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct SwapRequest {
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub source_token: TokenId,
    pub dest_token: TokenId,
    /// Depositor on the source chain, refunded on cancellation
    pub source_address: String,
    /// Recipient on the destination chain
    pub dest_address: String,
    pub amount: u128,
}

/// Why a swap is being unwound through cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unwind {
    /// Set when an error caused the unwind; the swap then ends FAILED
    pub error: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Swap {
    pub id: SwapId,
    pub source_chain: ChainId,
    pub dest_chain: ChainId,
    pub source_token: TokenId,
    pub dest_token: TokenId,
    pub source_address: String,
    pub dest_address: String,
    pub amount: u128,
    pub hashlock: Hashlock,
    pub htlc_id: HtlcId,
    pub secret: SealedSecret,
    pub phase: SwapPhase,
    pub unwind: Option<Unwind>,
    pub created_at: u64,
    pub locked_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub updated_at: u64,
    pub last_error: Option<String>,
    /// Set when automatic processing stopped and an operator must act
    pub intervention: Option<String>,
}

impl Swap {
    pub fn new(id: SwapId, request: SwapRequest, secret: Secret, hashlock: Hashlock, now: u64) -> Self {
        Self {
            id,
            source_chain: request.source_chain,
            dest_chain: request.dest_chain,
            source_token: request.source_token,
            dest_token: request.dest_token,
            source_address: request.source_address,
            dest_address: request.dest_address,
            amount: request.amount,
            hashlock,
            htlc_id: id.htlc_id(),
            secret: SealedSecret::new(secret),
            phase: SwapPhase::Pending,
            unwind: None,
            created_at: now,
            locked_at: None,
            completed_at: None,
            updated_at: now,
            last_error: None,
            intervention: None,
        }
    }

    pub fn state(&self) -> SwapState {
        self.phase.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_parked(&self) -> bool {
        self.intervention.is_some()
    }

    pub fn source_escrow_ref(&self) -> Option<&EscrowRef> {
        self.phase.source().map(|leg| &leg.escrow_ref)
    }

    pub fn dest_escrow_ref(&self) -> Option<&EscrowRef> {
        self.phase.destination().map(|leg| &leg.escrow_ref)
    }

    pub fn chain_of(&self, leg: Leg) -> &ChainId {
        match leg {
            Leg::Source => &self.source_chain,
            Leg::Destination => &self.dest_chain,
        }
    }

    pub fn token_of(&self, leg: Leg) -> &TokenId {
        match leg {
            Leg::Source => &self.source_token,
            Leg::Destination => &self.dest_token,
        }
    }

    /// `hashlock == H(secret)`
    pub fn commitment_holds(&self) -> bool {
        SecretVault::verify(self.secret.secret(), &self.hashlock)
    }

    /// True once any escrow paid out
    pub fn value_moved(&self) -> bool {
        self.phase.legs().iter().any(|(_, leg)| leg.is_withdrawn())
    }

    /// Move to `next`, rejecting edges outside the transition table
    pub fn transition(&mut self, next: SwapPhase, now: u64) -> Result<SwapState, SwapError> {
        let from = self.state();
        let to = next.state();
        if !from.can_transition_to(to) {
            return Err(SwapError::InvalidTransition { from, to });
        }
        self.phase = next;
        self.updated_at = now;
        Ok(from)
    }

    /// JSON status view; the secret stays sealed until revealed
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
