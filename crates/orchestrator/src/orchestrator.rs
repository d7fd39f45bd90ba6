use futures::future::join_all;
use htlc_bridge_gateway::{ChainGateway, EscrowEvent, GatewayRegistry, Subscription};
use htlc_bridge_liquidity::LiquidityLedger;
use htlc_bridge_metrics::MetricsCollector;
use htlc_bridge_retry::RetryExecutor;
use htlc_bridge_types::{
    ChainId, Clock, EscrowRef, Hashlock, Secret, SecretVault, SwapId, SystemClock, TxHash,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    BuilderError, InMemorySwapRepository, Leg, LegOutcome, OrchestratorConfig, ScanFilter,
    StateTransition, Swap, SwapError, SwapPhase, SwapRepository, SwapRequest, SwapState,
};

// Broadcast guard for the source escrow. Abort and the driver race on one CAS.
pub(crate) const QUEUED: u8 = 0;
pub(crate) const BROADCASTING: u8 = 1;
pub(crate) const ABORTED: u8 = 2;

/// Per-swap runtime state that is not persisted
pub(crate) struct SwapSlot {
    pub(crate) abort: AtomicU8,
    pub(crate) state_tx: watch::Sender<SwapState>,
    pub(crate) wake: Notify,
    pub(crate) inbox: Mutex<Vec<EscrowEvent>>,
}

impl SwapSlot {
    fn new(state: SwapState) -> Self {
        let (state_tx, _) = watch::channel(state);
        Self {
            abort: AtomicU8::new(QUEUED),
            state_tx,
            wake: Notify::new(),
            inbox: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn take_events(&self) -> Vec<EscrowEvent> {
        std::mem::take(&mut *self.inbox.lock().unwrap())
    }
}

#[derive(Default)]
struct Admission {
    in_flight: HashSet<SwapId>,
    hashlocks: HashMap<Hashlock, SwapId>,
}

pub(crate) struct Inner {
    pub(crate) config: OrchestratorConfig,
    pub(crate) ledger: Arc<LiquidityLedger>,
    pub(crate) repository: Arc<dyn SwapRepository>,
    pub(crate) gateways: GatewayRegistry,
    pub(crate) resolver_addresses: HashMap<ChainId, String>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) vault: SecretVault,
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) retry: RetryExecutor,
    admission: Mutex<Admission>,
    restored: OnceCell<()>,
    slots: Mutex<HashMap<SwapId, Arc<SwapSlot>>>,
    driving: Mutex<HashSet<SwapId>>,
    escrow_index: Mutex<HashMap<(ChainId, EscrowRef), SwapId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

/// Exclusive right to drive one swap; released on drop
pub(crate) struct DriverClaim {
    inner: Arc<Inner>,
    id: SwapId,
}

impl Drop for DriverClaim {
    fn drop(&mut self) {
        self.inner.driving.lock().unwrap().remove(&self.id);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for [`SwapOrchestrator`]
pub struct SwapOrchestratorBuilder {
    config: OrchestratorConfig,
    ledger: Option<Arc<LiquidityLedger>>,
    repository: Option<Arc<dyn SwapRepository>>,
    gateways: Vec<(Arc<dyn ChainGateway>, String)>,
    clock: Option<Arc<dyn Clock>>,
    vault: Option<SecretVault>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SwapOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            ledger: None,
            repository: None,
            gateways: Vec::new(),
            clock: None,
            vault: None,
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<LiquidityLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Defaults to [`InMemorySwapRepository`]
    pub fn with_repository(mut self, repository: Arc<dyn SwapRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Register a chain together with the coordinator's address on it.
    /// The address receives source-escrow payouts and funds destination escrows.
    pub fn with_gateway(
        mut self,
        gateway: Arc<dyn ChainGateway>,
        resolver_address: impl Into<String>,
    ) -> Self {
        self.gateways.push((gateway, resolver_address.into()));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_vault(mut self, vault: SecretVault) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<SwapOrchestrator, BuilderError> {
        self.config.validate().map_err(BuilderError::InvalidConfig)?;

        let ledger = self.ledger.ok_or_else(|| BuilderError::MissingField {
            field: "ledger".to_string(),
        })?;
        if self.gateways.is_empty() {
            return Err(BuilderError::MissingField {
                field: "gateway".to_string(),
            });
        }

        let registry = GatewayRegistry::new();
        let mut resolver_addresses = HashMap::new();
        for (gateway, address) in self.gateways {
            let chain = gateway.chain_id().clone();
            gateway.kind().validate_address(&address).map_err(|e| {
                BuilderError::InvalidConfig(format!("resolver address for {chain}: {e}"))
            })?;
            if resolver_addresses.insert(chain.clone(), address).is_some() {
                return Err(BuilderError::InvalidConfig(format!(
                    "chain {chain} registered twice"
                )));
            }
            registry.register(gateway);
        }

        let metrics = self.metrics.unwrap_or_default();
        let observer_metrics = metrics.clone();
        let retry = RetryExecutor::new(self.config.retry.clone()).with_observer(Arc::new(
            move |operation: &str, _attempt: u32| observer_metrics.record_chain_retry(operation),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(SwapOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                ledger,
                repository: self
                    .repository
                    .unwrap_or_else(|| Arc::new(InMemorySwapRepository::new())),
                gateways: registry,
                resolver_addresses,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                vault: self.vault.unwrap_or_default(),
                metrics,
                retry,
                admission: Mutex::new(Admission::default()),
                restored: OnceCell::new(),
                slots: Mutex::new(HashMap::new()),
                driving: Mutex::new(HashSet::new()),
                escrow_index: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
                background: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                shutdown_tx,
                started: AtomicBool::new(false),
            }),
        })
    }
}

impl Default for SwapOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Drives atomic swaps from initiation to a terminal state.
///
/// Cheap to clone; all clones share one set of swaps.
#[derive(Clone)]
pub struct SwapOrchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl SwapOrchestrator {
    pub fn builder() -> SwapOrchestratorBuilder {
        SwapOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &Arc<LiquidityLedger> {
        &self.inner.ledger
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.inner.gateways
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.inner.metrics
    }

    /// Validate and admit a swap, reserve liquidity on both chains and
    /// persist it as PENDING. Processing starts immediately when
    /// `auto_process` is set.
    pub async fn initiate_swap(&self, request: SwapRequest) -> Result<SwapId, SwapError> {
        match self.admit_swap(request).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.inner.metrics.record_rejection(e.kind());
                warn!(error = %e, reason = e.kind(), "swap request rejected");
                Err(e)
            }
        }
    }

    async fn admit_swap(&self, request: SwapRequest) -> Result<SwapId, SwapError> {
        self.validate_request(&request)?;
        self.restore_admission().await?;

        let id = SwapId::generate();
        let (secret, hashlock) = self.inner.vault.generate_commitment()?;
        self.admit(id, hashlock)?;

        if let Err(e) = self.inner.ledger.reserve(
            &request.source_chain,
            &request.source_token,
            request.amount,
            id,
        ) {
            self.free_admission(id, &hashlock);
            return Err(e.into());
        }
        if let Err(e) = self.inner.ledger.reserve(
            &request.dest_chain,
            &request.dest_token,
            request.amount,
            id,
        ) {
            self.release_reservations(id);
            self.free_admission(id, &hashlock);
            return Err(e.into());
        }

        let now = self.inner.clock.now();
        let swap = Swap::new(id, request, secret, hashlock, now);
        if let Err(e) = self.store_new(&swap, now).await {
            self.release_reservations(id);
            self.free_admission(id, &hashlock);
            return Err(e);
        }

        self.slot_for(id, SwapState::Pending);
        self.inner
            .metrics
            .record_swap_initiated(swap.source_chain.as_str(), swap.dest_chain.as_str());
        self.publish_liquidity(&swap);
        info!(
            swap_id = %id,
            source_chain = %swap.source_chain,
            dest_chain = %swap.dest_chain,
            amount = %swap.amount,
            hashlock = %hashlock,
            "swap initiated"
        );

        if self.inner.config.auto_process {
            self.spawn_driver(id);
        }
        Ok(id)
    }

    async fn store_new(&self, swap: &Swap, now: u64) -> Result<(), SwapError> {
        self.inner.repository.put(swap).await?;
        self.inner
            .repository
            .record_transition(
                &swap.id,
                StateTransition::new(None, SwapState::Pending, now).with_details("swap created"),
            )
            .await?;
        Ok(())
    }

    fn validate_request(&self, request: &SwapRequest) -> Result<(), SwapError> {
        if request.amount == 0 {
            return Err(SwapError::Validation("amount must be greater than zero".into()));
        }
        if request.source_chain == request.dest_chain {
            return Err(SwapError::Validation(format!(
                "source and destination chain are both {}",
                request.source_chain
            )));
        }
        if request.source_token.as_str().is_empty() || request.dest_token.as_str().is_empty() {
            return Err(SwapError::Validation("token id must not be empty".into()));
        }

        let source = self.gateway(&request.source_chain)?;
        let dest = self.gateway(&request.dest_chain)?;
        source
            .kind()
            .validate_address(&request.source_address)
            .map_err(|e| SwapError::Validation(format!("source address: {e}")))?;
        dest.kind()
            .validate_address(&request.dest_address)
            .map_err(|e| SwapError::Validation(format!("destination address: {e}")))?;
        Ok(())
    }

    /// Count swaps left non-terminal by an earlier process against capacity
    /// and hashlock uniqueness. Loads from the repository once; every path
    /// that admits or finalizes a swap calls this first.
    pub(crate) async fn restore_admission(&self) -> Result<(), SwapError> {
        self.inner
            .restored
            .get_or_try_init(|| async {
                let swaps = self
                    .inner
                    .repository
                    .scan(&ScanFilter::in_flight())
                    .await?;
                {
                    let mut admission = self.inner.admission.lock().unwrap();
                    for swap in &swaps {
                        admission.in_flight.insert(swap.id);
                        admission.hashlocks.entry(swap.hashlock).or_insert(swap.id);
                    }
                }
                if !swaps.is_empty() {
                    info!(swaps = swaps.len(), "restored in-flight swaps from repository");
                }
                Ok::<_, SwapError>(())
            })
            .await?;
        Ok(())
    }

    fn admit(&self, id: SwapId, hashlock: Hashlock) -> Result<(), SwapError> {
        let mut admission = self.inner.admission.lock().unwrap();
        let max = self.inner.config.max_in_flight;
        if admission.in_flight.len() >= max {
            return Err(SwapError::CapacityExceeded {
                in_flight: admission.in_flight.len(),
                max,
            });
        }
        if admission.hashlocks.contains_key(&hashlock) {
            return Err(SwapError::DuplicateHashlock(hashlock));
        }
        admission.in_flight.insert(id);
        admission.hashlocks.insert(hashlock, id);
        Ok(())
    }

    fn free_admission(&self, id: SwapId, hashlock: &Hashlock) {
        let mut admission = self.inner.admission.lock().unwrap();
        admission.in_flight.remove(&id);
        if admission.hashlocks.get(hashlock) == Some(&id) {
            admission.hashlocks.remove(hashlock);
        }
    }

    fn release_reservations(&self, id: SwapId) {
        if let Err(e) = self.inner.ledger.release(id) {
            error!(swap_id = %id, error = %e, error_kind = "ledger", "failed to release reservations");
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Queries
    // ───────────────────────────────────────────────────────────────────────

    pub async fn get_swap(&self, id: SwapId) -> Result<Swap, SwapError> {
        self.inner
            .repository
            .get(&id)
            .await?
            .ok_or(SwapError::NotFound(id))
    }

    pub async fn list_swaps(&self, filter: &ScanFilter) -> Result<Vec<Swap>, SwapError> {
        Ok(self.inner.repository.scan(filter).await?)
    }

    pub async fn history(&self, id: SwapId) -> Result<Vec<StateTransition>, SwapError> {
        self.get_swap(id).await?;
        Ok(self.inner.repository.history(&id).await?)
    }

    /// Non-terminal swaps currently admitted
    pub fn in_flight(&self) -> usize {
        self.inner.admission.lock().unwrap().in_flight.len()
    }

    /// Whether a task is currently processing `id`
    pub fn is_processing(&self, id: SwapId) -> bool {
        self.inner.driving.lock().unwrap().contains(&id)
    }

    /// Watch state changes of one swap
    pub async fn subscribe(&self, id: SwapId) -> Result<watch::Receiver<SwapState>, SwapError> {
        if let Some(slot) = self.slot(id) {
            return Ok(slot.state_tx.subscribe());
        }
        let swap = self.get_swap(id).await?;
        Ok(self.slot_for(id, swap.state()).state_tx.subscribe())
    }

    /// Resolve once the swap reaches COMPLETED, FAILED or REFUNDED
    pub async fn wait_for_terminal(&self, id: SwapId) -> Result<SwapState, SwapError> {
        let mut rx = self.subscribe(id).await?;
        let state = *rx
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|_| SwapError::NotFound(id))?;
        Ok(state)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Control
    // ───────────────────────────────────────────────────────────────────────

    /// Drive a swap on the calling task until it is terminal, parked or
    /// waiting is interrupted by shutdown
    pub async fn process_swap(&self, id: SwapId) -> Result<SwapState, SwapError> {
        let claim = self.claim(id).ok_or(SwapError::Busy(id))?;
        self.drive(id, claim).await
    }

    /// Cancel a swap whose source escrow has not been broadcast yet.
    /// The swap ends FAILED and its reservations are released.
    ///
    /// The source chain is checked as well as the in-process guard, so a
    /// swap broadcast by an earlier process is never aborted.
    pub async fn abort_swap(&self, id: SwapId) -> Result<(), SwapError> {
        self.restore_admission().await?;
        let swap = self.get_swap(id).await?;
        if swap.state() != SwapState::Pending {
            return Err(SwapError::AbortRejected {
                swap_id: id,
                reason: format!("swap is {}", swap.state()),
            });
        }

        if let Err(reason) = self.claim_unbroadcast(&swap).await {
            return Err(SwapError::AbortRejected { swap_id: id, reason });
        }
        let phase = SwapPhase::Failed {
            source: None,
            destination: None,
        };
        self.finalize(swap, phase, Some("aborted by operator".into()))
            .await?;
        info!(swap_id = %id, "swap aborted");
        Ok(())
    }

    /// Take the broadcast guard of a PENDING swap whose source escrow
    /// provably does not exist. On refusal the reason is returned and the
    /// guard is left untouched.
    pub(crate) async fn claim_unbroadcast(&self, swap: &Swap) -> Result<(), String> {
        let slot = self.slot_for(swap.id, swap.state());
        match slot.abort.load(Ordering::SeqCst) {
            QUEUED => {}
            ABORTED => return Err("already aborted".into()),
            _ => return Err("source escrow creation already broadcast".into()),
        }

        let gateway = self.gateway(&swap.source_chain).map_err(|e| e.to_string())?;
        match self
            .chain_call(&gateway, "find_escrow", || gateway.find_escrow(&swap.htlc_id))
            .await
        {
            Ok(None) => {}
            Ok(Some(record)) => {
                return Err(format!(
                    "source escrow {} already exists on {}",
                    record.escrow_ref, swap.source_chain
                ))
            }
            Err(e) => return Err(format!("source escrow lookup failed: {e}")),
        }

        match slot
            .abort
            .compare_exchange(QUEUED, ABORTED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(ABORTED) => Err("already aborted".into()),
            Err(_) => Err("source escrow creation already broadcast".into()),
        }
    }

    /// Operator path for a parked swap: withdraw one leg with a supplied
    /// secret. The secret is checked against the hashlock before anything
    /// else happens.
    pub async fn manual_withdraw(
        &self,
        id: SwapId,
        leg: Leg,
        secret: Secret,
    ) -> Result<TxHash, SwapError> {
        let swap = self.get_swap(id).await?;
        if !SecretVault::verify(&secret, &swap.hashlock) {
            warn!(swap_id = %id, leg = %leg, "manual withdraw with mismatched secret");
            return Err(SwapError::SecretMismatch { swap_id: id });
        }

        let claim = self.claim(id).ok_or(SwapError::Busy(id))?;
        let mut swap = self.get_swap(id).await?;
        if swap.is_terminal() {
            return Err(SwapError::Validation(format!("swap is {}", swap.state())));
        }
        let escrow = swap
            .phase
            .leg(leg)
            .ok_or_else(|| SwapError::Validation(format!("swap has no {leg} escrow")))?;
        if !escrow.is_open() {
            return Err(SwapError::Validation(format!("{leg} escrow is already settled")));
        }
        let escrow_ref = escrow.escrow_ref.clone();

        if swap.state() == SwapState::DestinationLocked {
            self.reveal(&mut swap).await?;
        }
        if swap.state() != SwapState::Withdrawing {
            return Err(SwapError::Validation(format!(
                "cannot withdraw while swap is {}",
                swap.state()
            )));
        }

        let gateway = self.gateway(swap.chain_of(leg))?;
        let tx_hash = self
            .chain_call(&gateway, "withdraw", || gateway.withdraw(&escrow_ref, &secret))
            .await
            .map_err(|e| SwapError::from_chain(id, e))?;

        self.record_leg_outcome(
            &mut swap,
            leg,
            LegOutcome::Withdrawn {
                tx_hash: Some(tx_hash.clone()),
            },
        );
        swap.intervention = None;
        self.save(&swap, format!("{leg} withdrawn by operator"), Some(tx_hash.clone()))
            .await?;
        info!(swap_id = %id, leg = %leg, tx_hash = %tx_hash, "manual withdrawal succeeded");

        drop(claim);
        self.spawn_driver(id);
        Ok(tx_hash)
    }

    /// Clear an intervention flag and restart automatic processing
    pub async fn resume(&self, id: SwapId) -> Result<(), SwapError> {
        let claim = self.claim(id).ok_or(SwapError::Busy(id))?;
        let mut swap = self.get_swap(id).await?;
        if swap.is_terminal() {
            return Err(SwapError::Validation(format!("swap is {}", swap.state())));
        }
        if let Some(reason) = swap.intervention.take() {
            swap.updated_at = self.inner.clock.now();
            self.save(&swap, format!("resumed by operator after: {reason}"), None)
                .await?;
            info!(swap_id = %id, "swap resumed");
        }
        drop(claim);
        self.slot_for(id, swap.state());
        if !self.spawn_driver(id) {
            return Err(SwapError::Busy(id));
        }
        Ok(())
    }

    /// Subscribe to chain events and start the periodic recovery sweep
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<EscrowEvent>();
        {
            let mut subscriptions = self.inner.subscriptions.lock().unwrap();
            for gateway in self.inner.gateways.all() {
                let tx = event_tx.clone();
                subscriptions.push(gateway.watch_events(Arc::new(move |event| {
                    let _ = tx.send(event);
                })));
            }
        }
        drop(event_tx);

        let this = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let events = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = event_rx.recv() => this.route_event(event),
                    _ = shutdown.changed() => break,
                }
            }
            debug!("escrow event loop stopped");
        });

        let this = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let sweeps = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.config.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = this.sweep_stale().await {
                            error!(error = %e, error_kind = e.kind(), "recovery sweep failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("recovery sweep loop stopped");
        });

        self.inner
            .background
            .lock()
            .unwrap()
            .extend([events, sweeps]);
        info!(chains = self.inner.gateways.len(), "swap orchestrator started");
    }

    /// Stop background work and wait for every processing task to yield.
    /// Swaps left mid-flight are picked up by recovery on the next start.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        self.inner.subscriptions.lock().unwrap().clear();
        for slot in self.inner.slots.lock().unwrap().values() {
            slot.wake.notify_waiters();
        }

        let mut handles: Vec<JoinHandle<()>> =
            self.inner.background.lock().unwrap().drain(..).collect();
        handles.extend(self.inner.tasks.lock().unwrap().drain(..));
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "task ended abnormally during shutdown");
            }
        }
        info!("swap orchestrator stopped");
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Internals shared with the driver and recovery
    // ───────────────────────────────────────────────────────────────────────

    pub(crate) fn gateway(&self, chain: &ChainId) -> Result<Arc<dyn ChainGateway>, SwapError> {
        self.inner
            .gateways
            .get(chain)
            .ok_or_else(|| SwapError::Validation(format!("no gateway registered for chain {chain}")))
    }

    pub(crate) fn resolver_address(&self, chain: &ChainId) -> Result<String, SwapError> {
        self.inner
            .resolver_addresses
            .get(chain)
            .cloned()
            .ok_or_else(|| SwapError::Validation(format!("no resolver address for chain {chain}")))
    }

    pub(crate) fn slot(&self, id: SwapId) -> Option<Arc<SwapSlot>> {
        self.inner.slots.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn slot_for(&self, id: SwapId, state: SwapState) -> Arc<SwapSlot> {
        self.inner
            .slots
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(|| Arc::new(SwapSlot::new(state)))
            .clone()
    }

    pub(crate) fn claim(&self, id: SwapId) -> Option<DriverClaim> {
        if self.inner.driving.lock().unwrap().insert(id) {
            Some(DriverClaim {
                inner: self.inner.clone(),
                id,
            })
        } else {
            None
        }
    }

    /// Start a processing task unless one is already live for `id`
    pub(crate) fn spawn_driver(&self, id: SwapId) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        let Some(claim) = self.claim(id) else {
            return false;
        };

        let this = self.clone();
        let handle = tokio::spawn(async move {
            match this.drive(id, claim).await {
                Ok(state) => debug!(swap_id = %id, state = %state, "processing task finished"),
                Err(e) => error!(
                    swap_id = %id,
                    error = %e,
                    error_kind = e.kind(),
                    "processing task stopped"
                ),
            }
        });

        let mut tasks = self.inner.tasks.lock().unwrap();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        true
    }

    pub(crate) fn index_escrows(&self, swap: &Swap) {
        let mut index = self.inner.escrow_index.lock().unwrap();
        for (leg, escrow) in swap.phase.legs() {
            index
                .entry((swap.chain_of(leg).clone(), escrow.escrow_ref.clone()))
                .or_insert(swap.id);
        }
    }

    fn route_event(&self, event: EscrowEvent) {
        let key = (event.chain().clone(), event.escrow_ref().clone());
        let Some(id) = self.inner.escrow_index.lock().unwrap().get(&key).copied() else {
            return;
        };
        let Some(slot) = self.slot(id) else {
            return;
        };
        if slot.state_tx.borrow().is_terminal() {
            return;
        }

        let settles = !matches!(event, EscrowEvent::Created { .. });
        debug!(swap_id = %id, chain = %key.0, escrow = %key.1, "escrow event observed");
        slot.inbox.lock().unwrap().push(event);
        slot.wake.notify_one();
        if settles {
            self.spawn_driver(id);
        }
    }

    /// Persist `swap` and append a history entry for a change that did not
    /// move the state
    pub(crate) async fn save(
        &self,
        swap: &Swap,
        details: impl Into<String>,
        tx_hash: Option<TxHash>,
    ) -> Result<(), SwapError> {
        let state = swap.state();
        self.inner.repository.put(swap).await?;
        self.inner
            .repository
            .record_transition(
                &swap.id,
                StateTransition::new(Some(state), state, swap.updated_at)
                    .with_details(details)
                    .with_tx_hash(tx_hash),
            )
            .await?;
        Ok(())
    }

    /// Move a non-terminal swap to `next` and persist it
    pub(crate) async fn advance(
        &self,
        swap: &mut Swap,
        next: SwapPhase,
        details: impl Into<String>,
        tx_hash: Option<TxHash>,
    ) -> Result<(), SwapError> {
        let now = self.inner.clock.now();
        let from = swap.transition(next, now)?;
        let to = swap.state();
        self.inner.repository.put(swap).await?;
        self.inner
            .repository
            .record_transition(
                &swap.id,
                StateTransition::new(Some(from), to, now)
                    .with_details(details)
                    .with_tx_hash(tx_hash),
            )
            .await?;
        if let Some(slot) = self.slot(swap.id) {
            slot.state_tx.send_replace(to);
        }
        self.index_escrows(swap);
        info!(swap_id = %swap.id, from = %from, to = %to, "swap state changed");
        Ok(())
    }

    /// Mark the secret revealed and enter WITHDRAWING
    pub(crate) async fn reveal(&self, swap: &mut Swap) -> Result<(), SwapError> {
        let (Some(source), Some(destination)) =
            (swap.phase.source().cloned(), swap.phase.destination().cloned())
        else {
            return Err(SwapError::InvalidTransition {
                from: swap.state(),
                to: SwapState::Withdrawing,
            });
        };
        swap.secret.reveal();
        self.advance(
            swap,
            SwapPhase::Withdrawing {
                source,
                destination,
            },
            "secret revealed",
            None,
        )
        .await
    }

    pub(crate) fn record_leg_outcome(&self, swap: &mut Swap, leg: Leg, outcome: LegOutcome) {
        if let Some(escrow) = swap.phase.leg_mut(leg) {
            escrow.outcome = Some(outcome);
        }
        swap.updated_at = self.inner.clock.now();
    }

    /// Enter a terminal state and settle the swap's liquidity exactly once:
    /// committed on COMPLETED, released otherwise
    pub(crate) async fn finalize(
        &self,
        mut swap: Swap,
        terminal: SwapPhase,
        error: Option<String>,
    ) -> Result<SwapState, SwapError> {
        let now = self.inner.clock.now();
        let from = swap.transition(terminal, now)?;
        let to = swap.state();
        if to == SwapState::Completed {
            swap.completed_at = Some(now);
        }
        if let Some(error) = &error {
            swap.last_error = Some(error.clone());
        }
        swap.intervention = None;

        let details = match (&error, &swap.unwind) {
            (Some(error), _) => error.clone(),
            (None, Some(unwind)) => unwind.reason.clone(),
            (None, None) => format!("swap {to}"),
        };
        self.inner.repository.put(&swap).await?;
        self.inner
            .repository
            .record_transition(
                &swap.id,
                StateTransition::new(Some(from), to, now).with_details(details),
            )
            .await?;

        let settled = if to == SwapState::Completed {
            self.inner.ledger.commit(swap.id)
        } else {
            self.inner.ledger.release(swap.id)
        };
        if let Err(e) = settled {
            error!(swap_id = %swap.id, error = %e, error_kind = "ledger", "failed to settle reservations");
        }
        self.publish_liquidity(&swap);
        self.free_admission(swap.id, &swap.hashlock);

        if let Some(slot) = self.slot(swap.id) {
            slot.state_tx.send_replace(to);
        }
        self.inner.metrics.record_swap_finished(
            to.as_str(),
            Duration::from_secs(now.saturating_sub(swap.created_at)),
        );

        match &error {
            Some(error) => warn!(swap_id = %swap.id, state = %to, error = %error, "swap finished"),
            None => info!(swap_id = %swap.id, state = %to, "swap finished"),
        }
        Ok(to)
    }

    /// Stop automatic processing until an operator acts
    pub(crate) async fn park(&self, swap: &mut Swap, reason: String) -> Result<(), SwapError> {
        swap.updated_at = self.inner.clock.now();
        swap.intervention = Some(reason.clone());
        self.save(swap, format!("intervention required: {reason}"), None)
            .await?;
        self.inner.metrics.record_swap_parked();
        error!(
            swap_id = %swap.id,
            state = %swap.state(),
            reason = %reason,
            error_kind = "intervention_required",
            "swap parked for manual intervention"
        );
        Ok(())
    }

    pub(crate) fn publish_liquidity(&self, swap: &Swap) {
        for (chain, token) in [
            (&swap.source_chain, &swap.source_token),
            (&swap.dest_chain, &swap.dest_token),
        ] {
            if let Some(record) = self.inner.ledger.snapshot(chain, token) {
                self.inner.metrics.set_liquidity(
                    chain.as_str(),
                    token.as_str(),
                    record.locked_balance,
                    record.available(),
                );
            }
        }
    }
}
