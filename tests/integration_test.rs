//! End-to-end swaps through a coordinator built from configuration

use futures::future::join_all;
use htlc_bridge::config::{AppConfig, ConfigLoader};
use htlc_bridge::gateway::{ChainOp, Fault};
use htlc_bridge::orchestrator::{ScanFilter, SwapRequest, SwapState};
use htlc_bridge::types::{ChainId, TokenId, TokioClock};
use htlc_bridge::Coordinator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const EVM_USER: &str = "0x2222222222222222222222222222222222222222";
const SOL_USER: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
const SEED: u128 = 100_000_000;

fn local_config() -> AppConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/local.toml");
    let mut config = ConfigLoader::from_file(&path).expect("Failed to load local profile");
    // Keep simulated calls instant so paused time only moves on deadlines
    for chain in config.chains.values_mut() {
        chain.simulated_latency_ms = 0;
    }
    config
}

fn coordinator(config: &AppConfig) -> Coordinator {
    Coordinator::simulated(config, Arc::new(TokioClock::starting_at(1_700_000_000)))
        .expect("Failed to build coordinator")
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

fn evm_to_solana(amount: u128) -> SwapRequest {
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

fn solana_to_evm(amount: u128) -> SwapRequest {
    SwapRequest {
        source_chain: devnet(),
        dest_chain: sepolia(),
        source_token: usdc(),
        dest_token: usdc(),
        source_address: SOL_USER.to_string(),
        dest_address: EVM_USER.to_string(),
        amount,
    }
}

#[tokio::test(start_paused = true)]
async fn test_swap_completes_from_local_profile() {
    let coordinator = coordinator(&local_config());
    coordinator.start();

    let orchestrator = coordinator.orchestrator();
    let id = orchestrator.initiate_swap(evm_to_solana(2_500)).await.unwrap();
    assert_eq!(
        orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Completed
    );

    let dest = coordinator.simulated_chain(&devnet()).unwrap();
    assert_eq!(dest.balance_of(SOL_USER, &usdc()), 2_500);

    let ledger = coordinator.ledger();
    let sepolia_record = ledger.snapshot(&sepolia(), &usdc()).unwrap();
    assert_eq!(sepolia_record.locked_balance, 0);
    assert_eq!(sepolia_record.total_balance, SEED - 2_500);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_swaps_in_both_directions() {
    let coordinator = coordinator(&local_config());
    let orchestrator = coordinator.orchestrator();

    let mut ids = Vec::new();
    for i in 1..=6u128 {
        let request = if i % 2 == 0 {
            evm_to_solana(i * 1_000)
        } else {
            solana_to_evm(i * 1_000)
        };
        ids.push(orchestrator.initiate_swap(request).await.unwrap());
    }

    let states = join_all(ids.iter().map(|id| orchestrator.wait_for_terminal(*id))).await;
    assert!(states
        .into_iter()
        .all(|s| s.unwrap() == SwapState::Completed));

    // Every swap commits its amount on both chains
    let committed: u128 = (1..=6u128).map(|i| i * 1_000).sum();
    for chain in [sepolia(), devnet()] {
        let record = coordinator.ledger().snapshot(&chain, &usdc()).unwrap();
        assert_eq!(record.locked_balance, 0);
        assert_eq!(record.total_balance, SEED - committed);
    }
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_destination_refunds_user() {
    let coordinator = coordinator(&local_config());
    let orchestrator = coordinator.orchestrator();
    let dest = coordinator.simulated_chain(&devnet()).unwrap();
    dest.inject_fault(ChainOp::Create, Fault::Rejected, 1);

    let id = orchestrator.initiate_swap(evm_to_solana(7_000)).await.unwrap();
    assert_eq!(
        orchestrator.wait_for_terminal(id).await.unwrap(),
        SwapState::Failed
    );

    let source = coordinator.simulated_chain(&sepolia()).unwrap();
    assert_eq!(source.balance_of(EVM_USER, &usdc()), 7_000);
    for chain in [sepolia(), devnet()] {
        let record = coordinator.ledger().snapshot(&chain, &usdc()).unwrap();
        assert_eq!(record.locked_balance, 0);
        assert_eq!(record.total_balance, SEED);
    }

    let failed = orchestrator
        .list_swaps(&ScanFilter::all().with_states(vec![SwapState::Failed]))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_fails_unprocessed_swaps() {
    let mut config = local_config();
    config.orchestrator.auto_process = false;
    let coordinator = coordinator(&config);
    coordinator.start();

    let orchestrator = coordinator.orchestrator();
    let id = orchestrator.initiate_swap(evm_to_solana(1_000)).await.unwrap();

    let stale_after = Duration::from_secs(config.orchestrator.stale_after_secs);
    let sweep = Duration::from_secs(config.orchestrator.sweep_interval_secs);
    tokio::time::sleep(stale_after + sweep * 2).await;

    assert_eq!(
        orchestrator.get_swap(id).await.unwrap().state(),
        SwapState::Failed
    );
    let record = coordinator.ledger().snapshot(&sepolia(), &usdc()).unwrap();
    assert_eq!(record.locked_balance, 0);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = local_config();
    config.orchestrator.reveal_margin_secs = config.timelocks.public_secs;

    let err = Coordinator::from_config(&config).err().unwrap();
    assert!(format!("{err:#}").contains("reveal_margin_secs"));
}

#[tokio::test]
async fn test_coordinator_shares_one_metrics_collector() {
    let coordinator = Coordinator::simulated(
        &local_config(),
        Arc::new(htlc_bridge::types::SystemClock),
    )
    .expect("Failed to build coordinator");

    assert!(Arc::ptr_eq(
        coordinator.metrics(),
        coordinator.orchestrator().metrics()
    ));
}
