use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimelockError {
    #[error(
        "invalid timelock ordering: finality {finality} < resolver {resolver} < public {public} < cancellation {cancellation} must hold"
    )]
    InvalidOrder {
        finality: u64,
        resolver: u64,
        public: u64,
        cancellation: u64,
    },

    #[error("timelock window {0} must be non-zero")]
    EmptyWindow(&'static str),

    #[error("escrow deadlines {found:?} differ from the expected {expected:?}")]
    Mismatch {
        expected: Box<Timelocks>,
        found: Box<Timelocks>,
    },
}

/// Window an escrow is in at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowPhase {
    /// Waiting for reorg safety, no withdrawals
    Finality,
    /// Only the resolver may withdraw
    ResolverExclusive,
    /// Anyone holding the preimage may withdraw
    Public,
    /// Withdrawals closed, cancellation not yet open
    Closed,
    /// Anyone may cancel and refund the depositor
    Cancellable,
}

impl EscrowPhase {
    pub fn allows_withdrawal(&self) -> bool {
        matches!(self, EscrowPhase::ResolverExclusive | EscrowPhase::Public)
    }

    pub fn allows_cancellation(&self) -> bool {
        matches!(self, EscrowPhase::Cancellable)
    }
}

/// Absolute deadlines (unix seconds) enforced by an escrow contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timelocks {
    pub finality_deadline: u64,
    pub resolver_deadline: u64,
    pub public_deadline: u64,
    pub cancellation_deadline: u64,
}

impl Timelocks {
    pub fn validate(&self) -> Result<(), TimelockError> {
        if self.finality_deadline < self.resolver_deadline
            && self.resolver_deadline < self.public_deadline
            && self.public_deadline < self.cancellation_deadline
        {
            Ok(())
        } else {
            Err(TimelockError::InvalidOrder {
                finality: self.finality_deadline,
                resolver: self.resolver_deadline,
                public: self.public_deadline,
                cancellation: self.cancellation_deadline,
            })
        }
    }

    pub fn phase_at(&self, now: u64) -> EscrowPhase {
        if now < self.finality_deadline {
            EscrowPhase::Finality
        } else if now < self.resolver_deadline {
            EscrowPhase::ResolverExclusive
        } else if now < self.public_deadline {
            EscrowPhase::Public
        } else if now < self.cancellation_deadline {
            EscrowPhase::Closed
        } else {
            EscrowPhase::Cancellable
        }
    }

    /// Seconds left before withdrawals close, zero once they have
    pub fn withdrawal_time_remaining(&self, now: u64) -> u64 {
        self.public_deadline.saturating_sub(now)
    }
}

/// Relative window lengths used to derive [`Timelocks`] at escrow creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockWindows {
    /// Reorg-safety period after creation
    pub finality: Duration,
    /// Resolver-exclusive withdrawal period
    pub resolver_exclusive: Duration,
    /// Public withdrawal period
    pub public: Duration,
    /// Gap between the end of withdrawals and the start of cancellation
    pub cancellation_delay: Duration,
}

impl TimelockWindows {
    pub fn validate(&self) -> Result<(), TimelockError> {
        let windows = [
            ("finality", self.finality),
            ("resolver_exclusive", self.resolver_exclusive),
            ("public", self.public),
            ("cancellation_delay", self.cancellation_delay),
        ];
        for (name, window) in windows {
            if window.as_secs() == 0 {
                return Err(TimelockError::EmptyWindow(name));
            }
        }
        Ok(())
    }

    /// Whether `timelocks` are exactly these windows laid out from some
    /// creation time
    pub fn generated(&self, timelocks: &Timelocks) -> bool {
        timelocks
            .finality_deadline
            .checked_sub(self.finality.as_secs())
            .is_some_and(|created_at| self.deadlines_from(created_at) == *timelocks)
    }

    /// Absolute deadlines for an escrow created at `created_at`
    pub fn deadlines_from(&self, created_at: u64) -> Timelocks {
        let finality_deadline = created_at + self.finality.as_secs();
        let resolver_deadline = finality_deadline + self.resolver_exclusive.as_secs();
        let public_deadline = resolver_deadline + self.public.as_secs();
        Timelocks {
            finality_deadline,
            resolver_deadline,
            public_deadline,
            cancellation_deadline: public_deadline + self.cancellation_delay.as_secs(),
        }
    }
}

impl Default for TimelockWindows {
    fn default() -> Self {
        Self {
            finality: Duration::from_secs(60),
            resolver_exclusive: Duration::from_secs(600), // 10 minutes
            public: Duration::from_secs(1800),            // 30 minutes
            cancellation_delay: Duration::from_secs(600), // 10 minutes
        }
    }
}
