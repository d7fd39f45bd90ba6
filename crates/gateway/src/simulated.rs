//! In-process escrow chain used by tests and local runs.
//!
//! Enforces the same rules as the on-chain HTLC program: creation parameter
//! checks, phase-gated withdraw/cancel, single settlement per escrow and
//! preimage verification. Faults can be queued per operation.

use async_trait::async_trait;
use htlc_bridge_types::{
    ChainId, ChainKind, Clock, EscrowRef, HtlcId, Secret, SecretVault, TokenId, TxHash,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::{
    ChainGateway, ChainOperationError, EscrowEvent, EscrowParams, EscrowReceipt, EscrowRecord,
    EscrowState, EventCallback, RevertReason, Subscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainOp {
    Create,
    Withdraw,
    Cancel,
    State,
    Find,
}

/// Injected failure for the next call of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fails before reaching the chain
    Transport,
    /// The transaction lands but the response is lost
    LostResponse,
    Revert(RevertReason),
    /// Non-retryable rejection by the node
    Rejected,
    /// Never answers
    Hang,
}

/// Identity submitting a withdraw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// The coordinator, allowed during the resolver-exclusive window
    Resolver,
    ThirdParty,
}

#[derive(Debug, Clone)]
struct SimEscrow {
    params: EscrowParams,
    withdrawn: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct SimState {
    escrows: HashMap<EscrowRef, SimEscrow>,
    by_htlc: HashMap<HtlcId, EscrowRef>,
    faults: HashMap<ChainOp, VecDeque<Fault>>,
    calls: HashMap<ChainOp, u32>,
    balances: HashMap<(String, TokenId), u128>,
    next_tx: u64,
}

pub struct SimulatedChain {
    chain_id: ChainId,
    kind: ChainKind,
    clock: Arc<dyn Clock>,
    state: Mutex<SimState>,
    subscribers: Arc<Mutex<HashMap<u64, EventCallback>>>,
    next_subscriber: AtomicU64,
    latency: Mutex<Duration>,
}

impl SimulatedChain {
    pub fn new(chain_id: impl Into<String>, kind: ChainKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            chain_id: ChainId::new(chain_id),
            kind,
            clock,
            state: Mutex::new(SimState::default()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: AtomicU64::new(0),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Queue `fault` for the next `count` calls of `op`
    pub fn inject_fault(&self, op: ChainOp, fault: Fault, count: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat(fault).take(count));
    }

    pub fn clear_faults(&self) {
        self.state.lock().unwrap().faults.clear();
    }

    /// Calls made for `op`, including failed ones
    pub fn call_count(&self, op: ChainOp) -> u32 {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub fn escrow_count(&self) -> usize {
        self.state.lock().unwrap().escrows.len()
    }

    pub fn escrow_params(&self, escrow: &EscrowRef) -> Option<EscrowParams> {
        self.state
            .lock()
            .unwrap()
            .escrows
            .get(escrow)
            .map(|e| e.params.clone())
    }

    /// Funds paid out to `address` by withdrawals or refunds
    pub fn balance_of(&self, address: &str, token: &TokenId) -> u128 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(address.to_string(), token.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Withdraw as an arbitrary identity, e.g. a counterparty in the public window
    pub async fn withdraw_as(
        &self,
        escrow: &EscrowRef,
        secret: &Secret,
        caller: Caller,
    ) -> Result<TxHash, ChainOperationError> {
        let lost = self.prelude(ChainOp::Withdraw).await?;
        let (tx, event) = self.apply_withdraw(escrow, secret, caller)?;
        self.emit(event);
        self.respond(lost, tx)
    }

    /// Cancel submitted by someone other than the coordinator
    pub async fn cancel_as_third_party(&self, escrow: &EscrowRef) -> Result<TxHash, ChainOperationError> {
        let (tx, event) = self.apply_cancel(escrow)?;
        self.emit(event);
        Ok(tx)
    }

    async fn prelude(&self, op: ChainOp) -> Result<bool, ChainOperationError> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(op).or_default() += 1;
            state.faults.get_mut(&op).and_then(|q| q.pop_front())
        };

        match fault {
            None => Ok(false),
            Some(Fault::LostResponse) => Ok(true),
            Some(Fault::Transport) => Err(ChainOperationError::transport(
                &self.chain_id,
                "connection reset by peer",
            )),
            Some(Fault::Revert(reason)) => Err(ChainOperationError::reverted(&self.chain_id, reason)),
            Some(Fault::Rejected) => Err(ChainOperationError::Rejected {
                chain: self.chain_id.clone(),
                message: "transaction rejected by node".to_string(),
                retryable: false,
            }),
            Some(Fault::Hang) => {
                std::future::pending::<()>().await;
                Ok(false)
            }
        }
    }

    fn respond<T>(&self, lost: bool, value: T) -> Result<T, ChainOperationError> {
        if lost {
            Err(ChainOperationError::transport(
                &self.chain_id,
                "response lost after broadcast",
            ))
        } else {
            Ok(value)
        }
    }

    fn revert(&self, reason: RevertReason) -> ChainOperationError {
        ChainOperationError::reverted(&self.chain_id, reason)
    }

    fn next_tx_hash(state: &mut SimState) -> TxHash {
        state.next_tx += 1;
        TxHash::new(format!("0x{:064x}", state.next_tx))
    }

    fn escrow_ref_for(&self, htlc_id: &HtlcId) -> EscrowRef {
        match self.kind {
            ChainKind::Evm => EscrowRef::new(format!("0x{}", hex::encode(&htlc_id.0[..20]))),
            ChainKind::Solana => EscrowRef::new(format!("escrow-{}", hex::encode(&htlc_id.0[..16]))),
        }
    }

    fn apply_create(&self, params: &EscrowParams) -> Result<(EscrowReceipt, EscrowEvent), ChainOperationError> {
        if params.amount == 0 {
            return Err(self.revert(RevertReason::InvalidAmount));
        }
        if params.safety_deposit == 0 {
            return Err(self.revert(RevertReason::InvalidSafetyDeposit));
        }
        if params.token.as_str().is_empty() {
            return Err(self.revert(RevertReason::InvalidTokenMint));
        }
        if self.kind.validate_address(&params.dest_address).is_err() {
            return Err(self.revert(RevertReason::InvalidDestination));
        }
        if params.timelocks.validate().is_err() {
            return Err(self.revert(RevertReason::InvalidTimelockOrder));
        }

        let mut state = self.state.lock().unwrap();
        if state.by_htlc.contains_key(&params.htlc_id) {
            return Err(self.revert(RevertReason::EscrowExists));
        }

        let escrow_ref = self.escrow_ref_for(&params.htlc_id);
        let tx_hash = Self::next_tx_hash(&mut state);
        state.by_htlc.insert(params.htlc_id, escrow_ref.clone());
        state.escrows.insert(
            escrow_ref.clone(),
            SimEscrow {
                params: params.clone(),
                withdrawn: false,
                cancelled: false,
            },
        );

        debug!(chain = %self.chain_id, escrow = %escrow_ref, amount = params.amount, "escrow created");
        Ok((
            EscrowReceipt {
                escrow_ref: escrow_ref.clone(),
                tx_hash,
            },
            EscrowEvent::Created {
                chain: self.chain_id.clone(),
                escrow_ref,
                htlc_id: params.htlc_id,
                hashlock: params.hashlock,
            },
        ))
    }

    fn apply_withdraw(
        &self,
        escrow_ref: &EscrowRef,
        secret: &Secret,
        caller: Caller,
    ) -> Result<(TxHash, EscrowEvent), ChainOperationError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let escrow = state
            .escrows
            .get(escrow_ref)
            .ok_or_else(|| self.revert(RevertReason::UnknownEscrow))?;

        if escrow.withdrawn {
            return Err(self.revert(RevertReason::AlreadyWithdrawn));
        }
        if escrow.cancelled {
            return Err(self.revert(RevertReason::AlreadyCancelled));
        }
        let phase = escrow.params.timelocks.phase_at(now);
        let allowed = match caller {
            Caller::Resolver => phase.allows_withdrawal(),
            Caller::ThirdParty => phase == htlc_bridge_types::EscrowPhase::Public,
        };
        if !allowed {
            return Err(self.revert(RevertReason::WithdrawalNotAllowed));
        }
        if !SecretVault::verify(secret, &escrow.params.hashlock) {
            return Err(self.revert(RevertReason::InvalidPreimage));
        }

        let payee = (escrow.params.dest_address.clone(), escrow.params.token.clone());
        let amount = escrow.params.amount;
        if let Some(escrow) = state.escrows.get_mut(escrow_ref) {
            escrow.withdrawn = true;
        }
        *state.balances.entry(payee).or_default() += amount;
        let tx_hash = Self::next_tx_hash(&mut state);

        debug!(chain = %self.chain_id, escrow = %escrow_ref, ?caller, "escrow withdrawn");
        Ok((
            tx_hash.clone(),
            EscrowEvent::Withdrawn {
                chain: self.chain_id.clone(),
                escrow_ref: escrow_ref.clone(),
                preimage: secret.clone(),
                tx_hash,
            },
        ))
    }

    fn apply_cancel(&self, escrow_ref: &EscrowRef) -> Result<(TxHash, EscrowEvent), ChainOperationError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let escrow = state
            .escrows
            .get(escrow_ref)
            .ok_or_else(|| self.revert(RevertReason::UnknownEscrow))?;

        if escrow.withdrawn {
            return Err(self.revert(RevertReason::AlreadyWithdrawn));
        }
        if escrow.cancelled {
            return Err(self.revert(RevertReason::AlreadyCancelled));
        }
        if !escrow.params.timelocks.phase_at(now).allows_cancellation() {
            return Err(self.revert(RevertReason::CancellationNotAllowed));
        }

        let refundee = (escrow.params.source_address.clone(), escrow.params.token.clone());
        let amount = escrow.params.amount;
        if let Some(escrow) = state.escrows.get_mut(escrow_ref) {
            escrow.cancelled = true;
        }
        *state.balances.entry(refundee).or_default() += amount;
        let tx_hash = Self::next_tx_hash(&mut state);

        debug!(chain = %self.chain_id, escrow = %escrow_ref, "escrow cancelled");
        Ok((
            tx_hash.clone(),
            EscrowEvent::Cancelled {
                chain: self.chain_id.clone(),
                escrow_ref: escrow_ref.clone(),
                tx_hash,
            },
        ))
    }

    fn emit(&self, event: EscrowEvent) {
        let callbacks: Vec<EventCallback> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[async_trait]
impl ChainGateway for SimulatedChain {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn kind(&self) -> ChainKind {
        self.kind
    }

    async fn create_escrow(&self, params: &EscrowParams) -> Result<EscrowReceipt, ChainOperationError> {
        let lost = self.prelude(ChainOp::Create).await?;
        let (receipt, event) = self.apply_create(params)?;
        self.emit(event);
        self.respond(lost, receipt)
    }

    async fn withdraw(&self, escrow: &EscrowRef, secret: &Secret) -> Result<TxHash, ChainOperationError> {
        let lost = self.prelude(ChainOp::Withdraw).await?;
        let (tx, event) = self.apply_withdraw(escrow, secret, Caller::Resolver)?;
        self.emit(event);
        self.respond(lost, tx)
    }

    async fn cancel(&self, escrow: &EscrowRef) -> Result<TxHash, ChainOperationError> {
        let lost = self.prelude(ChainOp::Cancel).await?;
        let (tx, event) = self.apply_cancel(escrow)?;
        self.emit(event);
        self.respond(lost, tx)
    }

    async fn escrow_state(&self, escrow: &EscrowRef) -> Result<EscrowState, ChainOperationError> {
        self.prelude(ChainOp::State).await?;
        let now = self.clock.now();
        let state = self.state.lock().unwrap();
        let escrow = state
            .escrows
            .get(escrow)
            .ok_or_else(|| self.revert(RevertReason::UnknownEscrow))?;
        Ok(EscrowState {
            phase: escrow.params.timelocks.phase_at(now),
            withdrawn: escrow.withdrawn,
            cancelled: escrow.cancelled,
        })
    }

    async fn find_escrow(
        &self,
        htlc_id: &HtlcId,
    ) -> Result<Option<EscrowRecord>, ChainOperationError> {
        self.prelude(ChainOp::Find).await?;
        let state = self.state.lock().unwrap();
        Ok(state.by_htlc.get(htlc_id).and_then(|escrow_ref| {
            state.escrows.get(escrow_ref).map(|escrow| EscrowRecord {
                escrow_ref: escrow_ref.clone(),
                params: escrow.params.clone(),
            })
        }))
    }

    fn watch_events(&self, callback: EventCallback) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().insert(id, callback);
        let subscribers = Arc::downgrade(&self.subscribers);
        Subscription::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.lock().unwrap().remove(&id);
            }
        })
    }
}

impl fmt::Debug for SimulatedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedChain")
            .field("chain_id", &self.chain_id)
            .field("kind", &self.kind)
            .field("escrows", &self.escrow_count())
            .finish()
    }
}
