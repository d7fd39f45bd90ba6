//! Swap scenarios against two simulated chains under paused tokio time

use async_trait::async_trait;
use htlc_bridge_gateway::{
    ChainGateway, ChainOp, ChainOperationError, EscrowParams, EscrowReceipt, EscrowRecord,
    EscrowState, EventCallback, Fault, RevertReason, SimulatedChain, Subscription,
};
use htlc_bridge_liquidity::LiquidityLedger;
use htlc_bridge_retry::RetryPolicy;
use htlc_bridge_types::{
    ChainId, ChainKind, Clock, EscrowRef, FixedEntropy, HtlcId, Secret, SecretVault,
    TimelockWindows, Timelocks, TokenId, TokioClock, TxHash,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

use crate::{
    InMemorySwapRepository, Leg, OrchestratorConfig, ScanFilter, SwapError, SwapOrchestrator,
    SwapRepository, SwapRequest, SwapState,
};

const EVM_USER: &str = "0x2222222222222222222222222222222222222222";
const EVM_RESOLVER: &str = "0x1111111111111111111111111111111111111111";
const SOL_USER: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
const SOL_RESOLVER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

const FUNDING: u128 = 10_000_000;
const AMOUNT: u128 = 1_000_000;

struct Harness {
    orchestrator: SwapOrchestrator,
    source: Arc<SimulatedChain>,
    dest: Arc<SimulatedChain>,
    ledger: Arc<LiquidityLedger>,
    repository: Arc<InMemorySwapRepository>,
    clock: Arc<TokioClock>,
}

impl Harness {
    fn new(config: OrchestratorConfig) -> Self {
        Self::with_vault(config, SecretVault::new())
    }

    fn with_vault(config: OrchestratorConfig, vault: SecretVault) -> Self {
        let clock = Arc::new(TokioClock::starting_at(1_000_000));
        let source = Arc::new(SimulatedChain::new("sepolia", ChainKind::Evm, clock.clone()));
        let dest = Arc::new(SimulatedChain::new("devnet", ChainKind::Solana, clock.clone()));
        let ledger = Arc::new(LiquidityLedger::new());
        ledger.deposit(&sepolia(), &usdc(), FUNDING).unwrap();
        ledger.deposit(&devnet(), &usdc(), FUNDING).unwrap();
        let repository = Arc::new(InMemorySwapRepository::new());

        let orchestrator = SwapOrchestrator::builder()
            .with_config(config)
            .with_ledger(ledger.clone())
            .with_repository(repository.clone())
            .with_gateway(source.clone(), EVM_RESOLVER)
            .with_gateway(dest.clone(), SOL_RESOLVER)
            .with_clock(clock.clone())
            .with_vault(vault)
            .build()
            .unwrap();

        Self {
            orchestrator,
            source,
            dest,
            ledger,
            repository,
            clock,
        }
    }

    /// A fresh orchestrator over the same chains, ledger and storage
    fn restart(&self, config: OrchestratorConfig) -> SwapOrchestrator {
        self.rebuild(config, SecretVault::new(), self.dest.clone())
    }

    fn rebuild(
        &self,
        config: OrchestratorConfig,
        vault: SecretVault,
        dest: Arc<dyn ChainGateway>,
    ) -> SwapOrchestrator {
        SwapOrchestrator::builder()
            .with_config(config)
            .with_ledger(self.ledger.clone())
            .with_repository(self.repository.clone())
            .with_gateway(self.source.clone(), EVM_RESOLVER)
            .with_gateway(dest, SOL_RESOLVER)
            .with_clock(self.clock.clone())
            .with_vault(vault)
            .build()
            .unwrap()
    }

    fn locked(&self, chain: &ChainId) -> u128 {
        self.ledger.snapshot(chain, &usdc()).unwrap().locked_balance
    }

    fn total(&self, chain: &ChainId) -> u128 {
        self.ledger.snapshot(chain, &usdc()).unwrap().total_balance
    }
}

fn sepolia() -> ChainId {
    ChainId::new("sepolia")
}

fn devnet() -> ChainId {
    ChainId::new("devnet")
}

fn usdc() -> TokenId {
    TokenId::new("usdc")
}

fn request(amount: u128) -> SwapRequest {
    SwapRequest {
        source_chain: sepolia(),
        dest_chain: devnet(),
        source_token: usdc(),
        dest_token: usdc(),
        source_address: EVM_USER.to_string(),
        dest_address: SOL_USER.to_string(),
        amount,
    }
}

fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default().with_retry(
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)).with_jitter(0.0),
    );
    config.poll_interval = Duration::from_secs(60);
    config
}

fn manual_config() -> OrchestratorConfig {
    test_config().with_auto_process(false)
}

/// Windows so short that finality plus the reveal margin overruns the
/// public deadline; every swap refunds
fn unrevealable_config() -> OrchestratorConfig {
    let mut config = test_config()
        .with_timelocks(TimelockWindows {
            finality: Duration::from_secs(60),
            resolver_exclusive: Duration::from_secs(60),
            public: Duration::from_secs(400),
            cancellation_delay: Duration::from_secs(60),
        })
        .with_reveal_margin(Duration::from_secs(300));
    config.finality_margin = Duration::from_secs(200);
    config
}

/// Destination gateway whose escrow lookups report altered deadlines
struct SkewedLookup {
    chain: Arc<SimulatedChain>,
    skew: fn(&mut Timelocks),
}

#[async_trait]
impl ChainGateway for SkewedLookup {
    fn chain_id(&self) -> &ChainId {
        self.chain.chain_id()
    }

    fn kind(&self) -> ChainKind {
        self.chain.kind()
    }

    async fn create_escrow(
        &self,
        params: &EscrowParams,
    ) -> Result<EscrowReceipt, ChainOperationError> {
        self.chain.create_escrow(params).await
    }

    async fn withdraw(
        &self,
        escrow: &EscrowRef,
        secret: &Secret,
    ) -> Result<TxHash, ChainOperationError> {
        self.chain.withdraw(escrow, secret).await
    }

    async fn cancel(&self, escrow: &EscrowRef) -> Result<TxHash, ChainOperationError> {
        self.chain.cancel(escrow).await
    }

    async fn escrow_state(&self, escrow: &EscrowRef) -> Result<EscrowState, ChainOperationError> {
        self.chain.escrow_state(escrow).await
    }

    async fn find_escrow(
        &self,
        htlc_id: &HtlcId,
    ) -> Result<Option<EscrowRecord>, ChainOperationError> {
        let mut record = self.chain.find_escrow(htlc_id).await?;
        if let Some(record) = record.as_mut() {
            (self.skew)(&mut record.params.timelocks);
        }
        Ok(record)
    }

    fn watch_events(&self, callback: EventCallback) -> Subscription {
        self.chain.watch_events(callback)
    }
}

/// Log sink for a scoped fmt subscriber
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn transitions(states: &[(Option<SwapState>, SwapState)]) -> Vec<SwapState> {
    states
        .iter()
        .filter(|(from, to)| *from != Some(*to))
        .map(|(_, to)| *to)
        .collect()
}

// ==================== Happy Path ====================

#[tokio::test(start_paused = true)]
async fn test_swap_completes_and_commits_liquidity() {
    let h = Harness::new(test_config());

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(h.locked(&sepolia()), AMOUNT);
    assert_eq!(h.locked(&devnet()), AMOUNT);

    let state = h.orchestrator.wait_for_terminal(id).await.unwrap();
    assert_eq!(state, SwapState::Completed);

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert!(swap.completed_at.is_some());
    assert!(swap.locked_at.is_some());
    assert!(swap.secret.is_revealed());
    assert!(swap.commitment_holds());
    assert!(swap.phase.source().unwrap().is_withdrawn());
    assert!(swap.phase.destination().unwrap().is_withdrawn());

    // Reservations committed exactly once
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.locked(&devnet()), 0);
    assert_eq!(h.total(&sepolia()), FUNDING - AMOUNT);
    assert_eq!(h.total(&devnet()), FUNDING - AMOUNT);
    assert_eq!(h.orchestrator.in_flight(), 0);

    assert_eq!(h.dest.balance_of(SOL_USER, &usdc()), AMOUNT);
    assert_eq!(h.source.balance_of(EVM_RESOLVER, &usdc()), AMOUNT);

    let history = h.orchestrator.history(id).await.unwrap();
    let states: Vec<_> = history.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        transitions(&states),
        vec![
            SwapState::Pending,
            SwapState::SourceLocked,
            SwapState::DestinationLocked,
            SwapState::Withdrawing,
            SwapState::Completed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_withdrawal_waits_for_finality() {
    let h = Harness::new(test_config());
    let start = h.clock.now();

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    h.orchestrator.wait_for_terminal(id).await.unwrap();

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    let source = swap.phase.source().unwrap();
    let ready_at = source.timelocks.finality_deadline + test_config().finality_margin.as_secs();
    assert!(swap.completed_at.unwrap() >= ready_at);
    assert!(swap.completed_at.unwrap() < source.timelocks.resolver_deadline);
    assert!(start < ready_at);
}

#[tokio::test(start_paused = true)]
async fn test_lost_create_receipt_adopts_escrow() {
    let h = Harness::new(test_config());
    h.source.inject_fault(ChainOp::Create, Fault::LostResponse, 1);

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Completed
    );

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert_eq!(h.source.escrow_count(), 1);
    assert!(swap.phase.source().unwrap().create_tx.is_none());
    assert!(h.source.call_count(ChainOp::Find) >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_destination_withdraw_failure_is_retried() {
    let h = Harness::new(test_config());
    h.dest.inject_fault(ChainOp::Withdraw, Fault::Transport, 4);

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Completed
    );
    assert_eq!(h.dest.balance_of(SOL_USER, &usdc()), AMOUNT);
}

// ==================== Admission ====================

#[tokio::test(start_paused = true)]
async fn test_invalid_requests_rejected_without_reserving() {
    let h = Harness::new(manual_config());

    let err = h.orchestrator.initiate_swap(request(0)).await.unwrap_err();
    assert!(matches!(err, SwapError::Validation(_)));

    let mut same_chain = request(AMOUNT);
    same_chain.dest_chain = sepolia();
    same_chain.dest_address = EVM_USER.to_string();
    assert!(matches!(
        h.orchestrator.initiate_swap(same_chain).await.unwrap_err(),
        SwapError::Validation(_)
    ));

    let mut bad_address = request(AMOUNT);
    bad_address.dest_address = EVM_USER.to_string();
    assert!(matches!(
        h.orchestrator.initiate_swap(bad_address).await.unwrap_err(),
        SwapError::Validation(_)
    ));

    let mut unknown_chain = request(AMOUNT);
    unknown_chain.dest_chain = ChainId::new("mainnet-beta");
    assert!(matches!(
        h.orchestrator.initiate_swap(unknown_chain).await.unwrap_err(),
        SwapError::Validation(_)
    ));

    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.locked(&devnet()), 0);
    assert_eq!(h.orchestrator.in_flight(), 0);
    assert!(h.repository.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_liquidity_rolls_back_source_reservation() {
    let h = Harness::new(manual_config());
    h.ledger.deposit(&sepolia(), &TokenId::new("wbtc"), FUNDING).unwrap();

    let err = h
        .orchestrator
        .initiate_swap(request(FUNDING + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::InsufficientLiquidity { .. }));

    // Source side reserves, destination side has no such asset
    let mut wbtc = request(AMOUNT);
    wbtc.source_token = TokenId::new("wbtc");
    wbtc.dest_token = TokenId::new("wbtc");
    let err = h.orchestrator.initiate_swap(wbtc).await.unwrap_err();
    assert!(matches!(
        err,
        SwapError::InsufficientLiquidity { ref chain, .. } if *chain == devnet()
    ));
    assert_eq!(
        h.ledger
            .snapshot(&sepolia(), &TokenId::new("wbtc"))
            .unwrap()
            .locked_balance,
        0
    );
    assert_eq!(h.orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_limit() {
    let h = Harness::new(manual_config().with_max_in_flight(2));

    let first = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();

    let err = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap_err();
    assert!(matches!(
        err,
        SwapError::CapacityExceeded {
            in_flight: 2,
            max: 2
        }
    ));
    assert_eq!(h.locked(&sepolia()), 2 * AMOUNT);

    h.orchestrator.abort_swap(first).await.unwrap();
    assert!(h.orchestrator.initiate_swap(request(AMOUNT)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_hashlock_rejected() {
    let vault = SecretVault::with_entropy(Arc::new(FixedEntropy([9u8; 32])));
    let h = Harness::with_vault(manual_config(), vault);

    let (a, b) = tokio::join!(
        h.orchestrator.initiate_swap(request(AMOUNT)),
        h.orchestrator.initiate_swap(request(AMOUNT))
    );
    let (accepted, rejected) = match (a, b) {
        (Ok(id), Err(e)) | (Err(e), Ok(id)) => (id, e),
        other => panic!("expected exactly one acceptance, got {other:?}"),
    };
    assert!(matches!(rejected, SwapError::DuplicateHashlock(_)));
    assert_eq!(h.locked(&sepolia()), AMOUNT);

    // A terminal swap frees its hashlock
    h.orchestrator.abort_swap(accepted).await.unwrap();
    assert!(h.orchestrator.initiate_swap(request(AMOUNT)).await.is_ok());
}

// ==================== Failure And Refund ====================

#[tokio::test(start_paused = true)]
async fn test_source_creation_failure_fails_clean() {
    let h = Harness::new(test_config());
    h.source.inject_fault(ChainOp::Create, Fault::Rejected, 1);

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Failed
    );

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert!(swap.phase.source().is_none());
    assert!(swap
        .last_error
        .as_deref()
        .unwrap()
        .contains("source escrow creation failed"));
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.total(&sepolia()), FUNDING);
    assert_eq!(h.source.escrow_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_destination_creation_failure_cancels_source() {
    let h = Harness::new(test_config());
    h.dest.inject_fault(ChainOp::Create, Fault::Rejected, 1);

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Failed
    );

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    let source = swap.phase.source().unwrap();
    assert!(source.is_cancelled());
    assert!(swap.phase.destination().is_none());
    assert!(swap
        .last_error
        .as_deref()
        .unwrap()
        .contains("destination escrow creation failed"));
    assert!(!swap.secret.is_revealed());

    // Cancelled only once the cancellation window opened
    let cancelled_at = h
        .orchestrator
        .history(id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.details.as_deref() == Some("source escrow cancelled"))
        .unwrap()
        .timestamp;
    assert!(cancelled_at >= source.timelocks.cancellation_deadline);

    assert_eq!(h.source.balance_of(EVM_USER, &usdc()), AMOUNT);
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.locked(&devnet()), 0);
    assert_eq!(h.total(&sepolia()), FUNDING);
    assert_eq!(h.total(&devnet()), FUNDING);
}

#[tokio::test(start_paused = true)]
async fn test_missed_reveal_window_refunds_both_legs() {
    let h = Harness::new(unrevealable_config());

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Refunded
    );

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert!(swap.phase.source().unwrap().is_cancelled());
    assert!(swap.phase.destination().unwrap().is_cancelled());
    assert!(swap.last_error.is_none());

    // The secret never left the process
    assert!(!swap.secret.is_revealed());
    assert!(swap.snapshot()["secret"].is_null());
    assert_eq!(h.source.call_count(ChainOp::Withdraw), 0);

    assert_eq!(h.source.balance_of(EVM_USER, &usdc()), AMOUNT);
    assert_eq!(h.dest.balance_of(SOL_RESOLVER, &usdc()), AMOUNT);
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.total(&devnet()), FUNDING);
}

#[tokio::test(start_paused = true)]
async fn test_third_party_cancellation_is_observed() {
    let h = Harness::new(unrevealable_config());
    h.orchestrator.start();
    h.source.inject_fault(ChainOp::Cancel, Fault::Transport, 1_000);
    h.dest.inject_fault(ChainOp::Cancel, Fault::Transport, 1_000);

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    let mut rx = h.orchestrator.subscribe(id).await.unwrap();
    rx.wait_for(|s| *s == SwapState::DestinationLocked)
        .await
        .unwrap();

    // Past the cancellation deadline while the coordinator's cancels keep failing
    tokio::time::sleep(Duration::from_secs(700)).await;
    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert_eq!(swap.state(), SwapState::DestinationLocked);
    assert!(swap.unwind.is_some());

    h.source
        .cancel_as_third_party(swap.source_escrow_ref().unwrap())
        .await
        .unwrap();
    h.dest
        .cancel_as_third_party(swap.dest_escrow_ref().unwrap())
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Refunded
    );
    let history = h.orchestrator.history(id).await.unwrap();
    assert!(history.iter().any(|t| t
        .details
        .as_deref()
        .is_some_and(|d| d.contains("cancellation observed"))));
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.locked(&devnet()), 0);

    h.orchestrator.shutdown().await;
}

// ==================== Operator Actions ====================

#[tokio::test(start_paused = true)]
async fn test_abort_before_broadcast() {
    let h = Harness::new(manual_config());
    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();

    h.orchestrator.abort_swap(id).await.unwrap();

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert_eq!(swap.state(), SwapState::Failed);
    assert_eq!(swap.last_error.as_deref(), Some("aborted by operator"));
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.source.call_count(ChainOp::Create), 0);

    let err = h.orchestrator.abort_swap(id).await.unwrap_err();
    assert!(matches!(err, SwapError::AbortRejected { .. }));

    // The processing path honours the abort
    assert_eq!(
        h.orchestrator.process_swap(id).await.unwrap(),
        SwapState::Failed
    );
    assert_eq!(h.source.escrow_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_rejected_after_broadcast() {
    let h = Harness::new(test_config());
    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();

    let mut rx = h.orchestrator.subscribe(id).await.unwrap();
    rx.wait_for(|s| *s == SwapState::SourceLocked).await.unwrap();

    let err = h.orchestrator.abort_swap(id).await.unwrap_err();
    assert!(matches!(err, SwapError::AbortRejected { .. }));
    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_wrong_secret_rejected_without_side_effects() {
    let h = Harness::new(manual_config());
    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    let before = h.orchestrator.history(id).await.unwrap().len();

    let err = h
        .orchestrator
        .manual_withdraw(id, Leg::Source, Secret::from_bytes([1u8; 32]))
        .await
        .unwrap_err();
    assert!(matches!(err, SwapError::SecretMismatch { swap_id } if swap_id == id));

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert_eq!(swap.state(), SwapState::Pending);
    assert_eq!(h.orchestrator.history(id).await.unwrap().len(), before);
    assert_eq!(h.source.call_count(ChainOp::Withdraw), 0);
    assert_eq!(h.locked(&sepolia()), AMOUNT);
}

#[tokio::test(start_paused = true)]
async fn test_partial_withdrawal_parks_until_operator_withdraws() {
    let h = Harness::new(test_config());
    h.dest.inject_fault(
        ChainOp::Withdraw,
        Fault::Revert(RevertReason::InvalidPreimage),
        1,
    );

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    let mut rx = h.orchestrator.subscribe(id).await.unwrap();
    rx.wait_for(|s| *s == SwapState::Withdrawing).await.unwrap();
    while !h.orchestrator.get_swap(id).await.unwrap().is_parked() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let mut swap = h.orchestrator.get_swap(id).await.unwrap();
    assert_eq!(swap.state(), SwapState::Withdrawing);
    assert!(swap.value_moved());
    assert!(swap.phase.destination().unwrap().is_open());
    assert_eq!(h.locked(&devnet()), AMOUNT);

    let parked = h
        .orchestrator
        .list_swaps(&ScanFilter::in_flight().parked(true))
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);

    // Recovery leaves parked swaps to the operator
    tokio::time::advance(Duration::from_secs(901)).await;
    let report = h.orchestrator.sweep_stale().await.unwrap();
    assert_eq!(report.parked, vec![id]);
    assert!(h.orchestrator.get_swap(id).await.unwrap().is_parked());

    let wrong = h
        .orchestrator
        .manual_withdraw(id, Leg::Destination, Secret::from_bytes([3u8; 32]))
        .await
        .unwrap_err();
    assert!(matches!(wrong, SwapError::SecretMismatch { .. }));

    let secret = swap.secret.reveal().clone();
    h.orchestrator
        .manual_withdraw(id, Leg::Destination, secret)
        .await
        .unwrap();
    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Completed
    );
    assert_eq!(h.dest.balance_of(SOL_USER, &usdc()), AMOUNT);
    assert_eq!(h.locked(&devnet()), 0);
}

// ==================== Recovery ====================

#[tokio::test(start_paused = true)]
async fn test_sweep_fails_stale_unbroadcast_swap() {
    let h = Harness::new(manual_config());
    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();

    let report = h.orchestrator.sweep_stale().await.unwrap();
    assert_eq!(report.scanned, 0);

    tokio::time::advance(Duration::from_secs(901)).await;
    let report = h.orchestrator.sweep_stale().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.failed, vec![id]);

    let swap = h.orchestrator.get_swap(id).await.unwrap();
    assert_eq!(swap.state(), SwapState::Failed);
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_resumes_swap_after_restart() {
    let h = Harness::new(test_config());
    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();

    let mut rx = h.orchestrator.subscribe(id).await.unwrap();
    rx.wait_for(|s| *s == SwapState::DestinationLocked)
        .await
        .unwrap();
    h.orchestrator.shutdown().await;

    let restarted = h.restart(test_config());
    tokio::time::advance(Duration::from_secs(901)).await;
    let report = restarted.sweep_stale().await.unwrap();
    assert_eq!(report.resumed, vec![id]);

    assert_eq!(
        restarted.wait_for_terminal(id).await.unwrap(),
        SwapState::Completed
    );
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.total(&devnet()), FUNDING - AMOUNT);
    assert_eq!(
        h.repository
            .history(&id)
            .await
            .unwrap()
            .last()
            .unwrap()
            .to,
        SwapState::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_restores_capacity_from_repository() {
    let h = Harness::new(manual_config().with_max_in_flight(1));
    let first = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();

    let restarted = h.restart(manual_config().with_max_in_flight(1));
    let err = restarted.initiate_swap(request(AMOUNT)).await.unwrap_err();
    assert!(matches!(
        err,
        SwapError::CapacityExceeded {
            in_flight: 1,
            max: 1
        }
    ));
    assert_eq!(restarted.in_flight(), 1);
    assert_eq!(h.locked(&sepolia()), AMOUNT);

    restarted.abort_swap(first).await.unwrap();
    assert_eq!(restarted.in_flight(), 0);
    assert!(restarted.initiate_swap(request(AMOUNT)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_restart_restores_active_hashlocks() {
    let entropy = Arc::new(FixedEntropy([9u8; 32]));
    let h = Harness::with_vault(manual_config(), SecretVault::with_entropy(entropy.clone()));
    h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();

    let restarted = h.rebuild(
        manual_config(),
        SecretVault::with_entropy(entropy),
        h.dest.clone(),
    );
    let err = restarted.initiate_swap(request(AMOUNT)).await.unwrap_err();
    assert!(matches!(err, SwapError::DuplicateHashlock(_)));
    assert_eq!(h.locked(&sepolia()), AMOUNT);
}

#[tokio::test(start_paused = true)]
async fn test_abort_after_restart_rejected_when_source_escrow_exists() {
    let h = Harness::new(manual_config());
    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    let swap = h.orchestrator.get_swap(id).await.unwrap();

    // The previous process broadcast the source escrow and then died
    let config = manual_config();
    h.source
        .create_escrow(&EscrowParams {
            htlc_id: swap.htlc_id,
            source_address: EVM_USER.to_string(),
            dest_address: EVM_RESOLVER.to_string(),
            token: usdc(),
            amount: AMOUNT,
            safety_deposit: config.safety_deposit,
            hashlock: swap.hashlock,
            timelocks: config.timelocks.deadlines_from(h.clock.now()),
        })
        .await
        .unwrap();

    let restarted = h.restart(manual_config());
    let err = restarted.abort_swap(id).await.unwrap_err();
    assert!(matches!(err, SwapError::AbortRejected { swap_id, .. } if swap_id == id));

    let swap = restarted.get_swap(id).await.unwrap();
    assert_eq!(swap.state(), SwapState::Pending);
    assert!(h.ledger.has_active_reservation(&id));
    assert_eq!(h.locked(&sepolia()), AMOUNT);

    // Processing adopts the escrow already on chain and completes
    assert_eq!(restarted.process_swap(id).await.unwrap(), SwapState::Completed);
    assert_eq!(h.source.escrow_count(), 1);
    assert!(!h.ledger.has_active_reservation(&id));
    assert_eq!(h.locked(&sepolia()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_rejected_when_escrow_lookup_fails() {
    let h = Harness::new(manual_config());
    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    h.source.inject_fault(ChainOp::Find, Fault::Rejected, 1);

    let err = h.orchestrator.abort_swap(id).await.unwrap_err();
    assert!(matches!(err, SwapError::AbortRejected { .. }));
    assert_eq!(
        h.orchestrator.get_swap(id).await.unwrap().state(),
        SwapState::Pending
    );

    // The guard was left alone, so a later abort still works
    h.orchestrator.abort_swap(id).await.unwrap();
    assert_eq!(h.locked(&sepolia()), 0);
}

// ==================== Timelocks ====================

#[tokio::test(start_paused = true)]
async fn test_adoption_rejects_disordered_deadlines() {
    let h = Harness::new(test_config());
    let dest = Arc::new(SkewedLookup {
        chain: h.dest.clone(),
        skew: |t| std::mem::swap(&mut t.resolver_deadline, &mut t.public_deadline),
    });
    let orchestrator = h.rebuild(test_config(), SecretVault::new(), dest);
    h.dest.inject_fault(ChainOp::Create, Fault::LostResponse, 1);

    let id = orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(
        orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Failed
    );

    let swap = orchestrator.get_swap(id).await.unwrap();
    assert!(swap.phase.destination().is_none());
    assert!(swap.phase.source().unwrap().is_cancelled());
    assert!(!swap.secret.is_revealed());
    let error = swap.last_error.unwrap();
    assert!(error.contains("invalid timelocks"), "{error}");
    assert!(error.contains("ordering"), "{error}");
    assert_eq!(h.locked(&sepolia()), 0);
    assert_eq!(h.locked(&devnet()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_adoption_rejects_deadlines_not_mirrored_from_source() {
    let h = Harness::new(test_config());
    let dest = Arc::new(SkewedLookup {
        chain: h.dest.clone(),
        skew: |t| t.cancellation_deadline += 3_600,
    });
    let orchestrator = h.rebuild(test_config(), SecretVault::new(), dest);
    h.dest.inject_fault(ChainOp::Create, Fault::LostResponse, 1);

    let id = orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    assert_eq!(
        orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Failed
    );

    let swap = orchestrator.get_swap(id).await.unwrap();
    assert!(swap.phase.destination().is_none());
    let error = swap.last_error.unwrap();
    assert!(error.contains("differ from the expected"), "{error}");
    assert_eq!(h.source.balance_of(EVM_USER, &usdc()), AMOUNT);
}

// ==================== Diagnostics ====================

#[tokio::test(start_paused = true)]
async fn test_secret_never_logged() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let vault = SecretVault::with_entropy(Arc::new(FixedEntropy([9u8; 32])));
    let h = Harness::with_vault(test_config(), vault);
    h.source.inject_fault(ChainOp::Create, Fault::LostResponse, 1);
    h.dest.inject_fault(ChainOp::Withdraw, Fault::Transport, 2);

    let id = h.orchestrator.initiate_swap(request(AMOUNT)).await.unwrap();
    let mut rx = h.orchestrator.subscribe(id).await.unwrap();
    rx.wait_for(|s| *s == SwapState::DestinationLocked)
        .await
        .unwrap();

    let secret_hex = Secret::from_bytes([9u8; 32]).to_hex();
    let hashlock = h.orchestrator.get_swap(id).await.unwrap().hashlock;
    let before_reveal = logs.contents();
    assert!(before_reveal.contains(&hashlock.to_string()));
    assert!(!before_reveal.contains(&secret_hex));

    assert_eq!(
        h.orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Completed
    );
    let all = logs.contents();
    assert!(all.contains("adopting escrow"));
    assert!(!all.contains(&secret_hex));
    assert!(!all.contains("[9, 9, 9"));
}
