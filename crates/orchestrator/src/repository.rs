use async_trait::async_trait;
use htlc_bridge_types::{SwapId, TxHash};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::{Swap, SwapState};

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// History entry for a swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    /// `None` for the creation entry
    pub from: Option<SwapState>,
    pub to: SwapState,
    pub timestamp: u64,
    pub details: Option<String>,
    pub tx_hash: Option<TxHash>,
}

impl StateTransition {
    pub fn new(from: Option<SwapState>, to: SwapState, timestamp: u64) -> Self {
        Self {
            from,
            to,
            timestamp,
            details: None,
            tx_hash: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: Option<TxHash>) -> Self {
        self.tx_hash = tx_hash;
        self
    }
}

/// Selection for [`SwapRepository::scan`]; empty filter matches everything
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub states: Option<Vec<SwapState>>,
    pub non_terminal_only: bool,
    /// Only swaps last updated at or before this time
    pub updated_before: Option<u64>,
    pub parked: Option<bool>,
    pub limit: Option<usize>,
}

impl ScanFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_flight() -> Self {
        Self {
            non_terminal_only: true,
            ..Self::default()
        }
    }

    pub fn with_states(mut self, states: Vec<SwapState>) -> Self {
        self.states = Some(states);
        self
    }

    pub fn updated_before(mut self, timestamp: u64) -> Self {
        self.updated_before = Some(timestamp);
        self
    }

    pub fn parked(mut self, parked: bool) -> Self {
        self.parked = Some(parked);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, swap: &Swap) -> bool {
        if self.non_terminal_only && swap.is_terminal() {
            return false;
        }
        if let Some(states) = &self.states {
            if !states.contains(&swap.state()) {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if swap.updated_at > before {
                return false;
            }
        }
        if let Some(parked) = self.parked {
            if swap.is_parked() != parked {
                return false;
            }
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("swap not found: {0}")]
    NotFound(SwapId),

    #[error("storage error: {0}")]
    Storage(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// REPOSITORY TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Swap storage, injected into the orchestrator so a persistent backend can
/// replace the in-memory one
#[async_trait]
pub trait SwapRepository: Send + Sync {
    async fn get(&self, id: &SwapId) -> Result<Option<Swap>, RepositoryError>;

    /// Insert or replace a swap
    async fn put(&self, swap: &Swap) -> Result<(), RepositoryError>;

    /// Swaps matching `filter`, oldest first
    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Swap>, RepositoryError>;

    async fn record_transition(
        &self,
        id: &SwapId,
        transition: StateTransition,
    ) -> Result<(), RepositoryError>;

    async fn history(&self, id: &SwapId) -> Result<Vec<StateTransition>, RepositoryError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY REPOSITORY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct InMemorySwapRepository {
    swaps: Arc<RwLock<HashMap<SwapId, Swap>>>,
    transitions: Arc<RwLock<HashMap<SwapId, Vec<StateTransition>>>>,
}

impl InMemorySwapRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.swaps.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.swaps.read().unwrap().is_empty()
    }
}

#[async_trait]
impl SwapRepository for InMemorySwapRepository {
    async fn get(&self, id: &SwapId) -> Result<Option<Swap>, RepositoryError> {
        Ok(self.swaps.read().unwrap().get(id).cloned())
    }

    async fn put(&self, swap: &Swap) -> Result<(), RepositoryError> {
        self.swaps.write().unwrap().insert(swap.id, swap.clone());
        Ok(())
    }

    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Swap>, RepositoryError> {
        let mut swaps: Vec<Swap> = self
            .swaps
            .read()
            .unwrap()
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        swaps.sort_by_key(|s| (s.created_at, s.id));
        if let Some(limit) = filter.limit {
            swaps.truncate(limit);
        }
        Ok(swaps)
    }

    async fn record_transition(
        &self,
        id: &SwapId,
        transition: StateTransition,
    ) -> Result<(), RepositoryError> {
        if !self.swaps.read().unwrap().contains_key(id) {
            return Err(RepositoryError::NotFound(*id));
        }
        self.transitions
            .write()
            .unwrap()
            .entry(*id)
            .or_default()
            .push(transition);
        Ok(())
    }

    async fn history(&self, id: &SwapId) -> Result<Vec<StateTransition>, RepositoryError> {
        Ok(self
            .transitions
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}
