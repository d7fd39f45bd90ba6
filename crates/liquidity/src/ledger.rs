use htlc_bridge_types::{ChainId, SwapId, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

use crate::LedgerError;

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Ledger shard key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiquidityKey {
    pub chain: ChainId,
    pub token: TokenId,
}

impl LiquidityKey {
    pub fn new(chain: ChainId, token: TokenId) -> Self {
        Self { chain, token }
    }
}

impl fmt::Display for LiquidityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.token)
    }
}

/// Balances for one (chain, token); `available = total - locked`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityRecord {
    pub total_balance: u128,
    pub locked_balance: u128,
}

impl LiquidityRecord {
    pub fn available(&self) -> u128 {
        self.total_balance - self.locked_balance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    /// Returned to available balance
    Released,
    /// Removed from the total; the funds left the coordinator's control
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub swap_id: SwapId,
    pub key: LiquidityKey,
    pub amount: u128,
    pub status: ReservationStatus,
}

/// Result of settling a swap's reservations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Reservations moved to their final status; `amount` summed over all keys
    Settled { amount: u128, reservations: usize },
    /// Nothing active for this swap (already settled or never reserved)
    NoOp,
}

// ═══════════════════════════════════════════════════════════════════════════
// LEDGER
// ═══════════════════════════════════════════════════════════════════════════

/// Reservable balances per (chain, token).
///
/// Each key lives behind its own mutex, and every balance mutation is a
/// single critical section on that mutex. The API is synchronous, so a lock
/// can never be held across an await point.
#[derive(Debug, Default)]
pub struct LiquidityLedger {
    shards: RwLock<HashMap<LiquidityKey, Arc<Mutex<LiquidityRecord>>>>,
    reservations: Mutex<HashMap<SwapId, Vec<Reservation>>>,
}

impl LiquidityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, key: &LiquidityKey) -> Option<Arc<Mutex<LiquidityRecord>>> {
        self.shards.read().unwrap().get(key).cloned()
    }

    fn shard_or_insert(&self, key: &LiquidityKey) -> Arc<Mutex<LiquidityRecord>> {
        if let Some(shard) = self.shard(key) {
            return shard;
        }
        self.shards
            .write()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Add funds under the coordinator's control
    pub fn deposit(&self, chain: &ChainId, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        let key = LiquidityKey::new(chain.clone(), token.clone());
        let shard = self.shard_or_insert(&key);
        let mut record = shard.lock().unwrap();
        record.total_balance = record
            .total_balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow {
                chain: chain.clone(),
                token: token.clone(),
            })?;
        info!(key = %key, amount, total = record.total_balance, "liquidity deposited");
        Ok(())
    }

    /// Remove unreserved funds, e.g. when an operator rebalances
    pub fn withdraw(&self, chain: &ChainId, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        let shard = self.shard(&LiquidityKey::new(chain.clone(), token.clone())).ok_or_else(|| {
            LedgerError::UnknownAsset {
                chain: chain.clone(),
                token: token.clone(),
            }
        })?;
        let mut record = shard.lock().unwrap();
        if record.available() < amount {
            return Err(LedgerError::InsufficientLiquidity {
                chain: chain.clone(),
                token: token.clone(),
                requested: amount,
                available: record.available(),
            });
        }
        record.total_balance -= amount;
        Ok(())
    }

    /// Hold `amount` against available balance for `swap_id`
    pub fn reserve(
        &self,
        chain: &ChainId,
        token: &TokenId,
        amount: u128,
        swap_id: SwapId,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let key = LiquidityKey::new(chain.clone(), token.clone());
        let shard = self.shard(&key).ok_or_else(|| LedgerError::UnknownAsset {
            chain: chain.clone(),
            token: token.clone(),
        })?;

        {
            let reservations = self.reservations.lock().unwrap();
            let duplicate = reservations.get(&swap_id).is_some_and(|held| {
                held.iter()
                    .any(|r| r.key == key && r.status == ReservationStatus::Active)
            });
            if duplicate {
                return Err(LedgerError::DuplicateReservation {
                    swap_id,
                    chain: chain.clone(),
                    token: token.clone(),
                });
            }
        }

        {
            let mut record = shard.lock().unwrap();
            let available = record.available();
            if available < amount {
                debug!(key = %key, swap_id = %swap_id, requested = amount, available, "reservation rejected");
                return Err(LedgerError::InsufficientLiquidity {
                    chain: chain.clone(),
                    token: token.clone(),
                    requested: amount,
                    available,
                });
            }
            record.locked_balance += amount;
        }

        self.reservations
            .lock()
            .unwrap()
            .entry(swap_id)
            .or_default()
            .push(Reservation {
                swap_id,
                key: key.clone(),
                amount,
                status: ReservationStatus::Active,
            });

        info!(key = %key, swap_id = %swap_id, amount, "liquidity reserved");
        Ok(())
    }

    /// Return every active reservation of `swap_id` to available balance.
    /// Calling it again, or after [`LiquidityLedger::commit`], is a no-op.
    pub fn release(&self, swap_id: SwapId) -> Result<SettleOutcome, LedgerError> {
        self.settle(swap_id, ReservationStatus::Released)
    }

    /// Turn every active reservation of `swap_id` into a permanent balance reduction
    pub fn commit(&self, swap_id: SwapId) -> Result<SettleOutcome, LedgerError> {
        self.settle(swap_id, ReservationStatus::Committed)
    }

    fn settle(&self, swap_id: SwapId, target: ReservationStatus) -> Result<SettleOutcome, LedgerError> {
        // Flip status first so a concurrent second call sees nothing left to settle
        let claimed: Vec<(LiquidityKey, u128)> = {
            let mut reservations = self.reservations.lock().unwrap();
            match reservations.get_mut(&swap_id) {
                Some(held) => held
                    .iter_mut()
                    .filter(|r| r.status == ReservationStatus::Active)
                    .map(|r| {
                        r.status = target;
                        (r.key.clone(), r.amount)
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        if claimed.is_empty() {
            debug!(swap_id = %swap_id, target = ?target, "no active reservations to settle");
            return Ok(SettleOutcome::NoOp);
        }

        let mut total = 0u128;
        for (key, amount) in &claimed {
            let shard = self.shard(key).ok_or_else(|| {
                LedgerError::InvariantViolation(format!("reservation on unknown key {key}"))
            })?;
            let mut record = shard.lock().unwrap();
            record.locked_balance = record.locked_balance.checked_sub(*amount).ok_or_else(|| {
                LedgerError::InvariantViolation(format!(
                    "locked balance on {key} below reservation of {amount}"
                ))
            })?;
            if target == ReservationStatus::Committed {
                record.total_balance -= amount;
            }
            total += amount;
        }

        match target {
            ReservationStatus::Committed => {
                info!(swap_id = %swap_id, amount = total, "liquidity reservation committed")
            }
            _ => info!(swap_id = %swap_id, amount = total, "liquidity reservation released"),
        }

        Ok(SettleOutcome::Settled {
            amount: total,
            reservations: claimed.len(),
        })
    }

    /// Available balance for (chain, token); zero if unknown
    pub fn available(&self, chain: &ChainId, token: &TokenId) -> u128 {
        self.snapshot(chain, token)
            .map(|r| r.available())
            .unwrap_or(0)
    }

    pub fn snapshot(&self, chain: &ChainId, token: &TokenId) -> Option<LiquidityRecord> {
        self.shard(&LiquidityKey::new(chain.clone(), token.clone()))
            .map(|shard| *shard.lock().unwrap())
    }

    /// Every record, sorted by key
    pub fn snapshots(&self) -> Vec<(LiquidityKey, LiquidityRecord)> {
        let shards: Vec<_> = self
            .shards
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut out: Vec<_> = shards
            .into_iter()
            .map(|(k, shard)| {
                let record = *shard.lock().unwrap();
                (k, record)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn reservations_for(&self, swap_id: &SwapId) -> Vec<Reservation> {
        self.reservations
            .lock()
            .unwrap()
            .get(swap_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_active_reservation(&self, swap_id: &SwapId) -> bool {
        self.reservations_for(swap_id)
            .iter()
            .any(|r| r.status == ReservationStatus::Active)
    }
}
