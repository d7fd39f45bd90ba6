use async_trait::async_trait;
use htlc_bridge_types::{
    ChainId, ChainKind, EscrowPhase, EscrowRef, Hashlock, HtlcId, Secret, Timelocks, TokenId,
    TxHash,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::ChainOperationError;

/// Everything an escrow program needs to lock funds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    pub htlc_id: HtlcId,
    /// Depositor, refunded on cancellation
    pub source_address: String,
    /// Recipient, paid on withdrawal
    pub dest_address: String,
    pub token: TokenId,
    pub amount: u128,
    /// Native-token incentive paid to whoever withdraws or cancels
    pub safety_deposit: u128,
    pub hashlock: Hashlock,
    pub timelocks: Timelocks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowReceipt {
    pub escrow_ref: EscrowRef,
    pub tx_hash: TxHash,
}

/// An escrow read back from chain storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub escrow_ref: EscrowRef,
    pub params: EscrowParams,
}

/// On-chain view of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowState {
    pub phase: EscrowPhase,
    pub withdrawn: bool,
    pub cancelled: bool,
}

impl EscrowState {
    pub fn is_settled(&self) -> bool {
        self.withdrawn || self.cancelled
    }
}

/// Escrow lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowEvent {
    Created {
        chain: ChainId,
        escrow_ref: EscrowRef,
        htlc_id: HtlcId,
        hashlock: Hashlock,
    },
    /// Carries the preimage the withdrawer revealed
    Withdrawn {
        chain: ChainId,
        escrow_ref: EscrowRef,
        preimage: Secret,
        tx_hash: TxHash,
    },
    Cancelled {
        chain: ChainId,
        escrow_ref: EscrowRef,
        tx_hash: TxHash,
    },
}

impl EscrowEvent {
    pub fn chain(&self) -> &ChainId {
        match self {
            EscrowEvent::Created { chain, .. }
            | EscrowEvent::Withdrawn { chain, .. }
            | EscrowEvent::Cancelled { chain, .. } => chain,
        }
    }

    pub fn escrow_ref(&self) -> &EscrowRef {
        match self {
            EscrowEvent::Created { escrow_ref, .. }
            | EscrowEvent::Withdrawn { escrow_ref, .. }
            | EscrowEvent::Cancelled { escrow_ref, .. } => escrow_ref,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(EscrowEvent) + Send + Sync>;

/// Event subscription handle; unsubscribes when called or dropped
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to tear down
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Per-chain escrow driver
#[async_trait]
pub trait ChainGateway: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    fn kind(&self) -> ChainKind;

    async fn create_escrow(
        &self,
        params: &EscrowParams,
    ) -> Result<EscrowReceipt, ChainOperationError>;

    async fn withdraw(
        &self,
        escrow: &EscrowRef,
        secret: &Secret,
    ) -> Result<TxHash, ChainOperationError>;

    async fn cancel(&self, escrow: &EscrowRef) -> Result<TxHash, ChainOperationError>;

    async fn escrow_state(&self, escrow: &EscrowRef) -> Result<EscrowState, ChainOperationError>;

    /// Look up an escrow by its cross-chain id, used to adopt an escrow whose
    /// creation receipt was lost
    async fn find_escrow(
        &self,
        htlc_id: &HtlcId,
    ) -> Result<Option<EscrowRecord>, ChainOperationError>;

    fn watch_events(&self, callback: EventCallback) -> Subscription;
}

/// Bound a chain call by `timeout`; expiry surfaces as a retryable error
pub async fn with_timeout<T, F>(
    chain: &ChainId,
    operation: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, ChainOperationError>
where
    F: Future<Output = Result<T, ChainOperationError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(chain = %chain, operation, timeout_ms = timeout.as_millis() as u64, "chain call timed out");
            Err(ChainOperationError::Timeout {
                chain: chain.clone(),
                operation: operation.to_string(),
                after: timeout,
            })
        }
    }
}
