//! HTLC bridge coordinator
//!
//! Moves value between two chains through a pair of hash-time-locked
//! escrows. This crate wires the workspace together: it turns an
//! [`AppConfig`] into a running [`SwapOrchestrator`] with its ledger,
//! gateways and tracing, and re-exports the member crates.
//!
//! ```no_run
//! use htlc_bridge::{config::ConfigLoader, Coordinator};
//! use std::path::Path;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ConfigLoader::from_file(Path::new("config/local.toml"))?;
//! let coordinator = Coordinator::from_config(&config)?;
//! htlc_bridge::init_tracing(&config, coordinator.metrics().clone())?;
//!
//! coordinator.start();
//! // ... initiate swaps through coordinator.orchestrator()
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use htlc_bridge_config as config;
pub use htlc_bridge_gateway as gateway;
pub use htlc_bridge_liquidity as liquidity;
pub use htlc_bridge_metrics as metrics;
pub use htlc_bridge_orchestrator as orchestrator;
pub use htlc_bridge_retry as retry;
pub use htlc_bridge_types as types;

use htlc_bridge_config::{validate_config, AppConfig, LoggingConfig};
use htlc_bridge_gateway::{ChainGateway, SimulatedChain};
use htlc_bridge_liquidity::LiquidityLedger;
use htlc_bridge_metrics::{MetricsCollector, TracingOptions};
use htlc_bridge_orchestrator::{OrchestratorConfig, SwapOrchestrator};
use htlc_bridge_types::{ChainId, Clock, SystemClock, TokenId};

/// Orchestrator settings taken from the loaded configuration
pub fn orchestrator_config(config: &AppConfig) -> OrchestratorConfig {
    let settings = &config.orchestrator;
    OrchestratorConfig {
        max_in_flight: settings.max_in_flight,
        finality_margin: settings.finality_margin(),
        reveal_margin: settings.reveal_margin(),
        poll_interval: settings.poll_interval(),
        chain_call_timeout: settings.chain_call_timeout(),
        stale_after: settings.stale_after(),
        sweep_interval: settings.sweep_interval(),
        timelocks: config.timelocks.windows(),
        retry: config.retry.policy(),
        safety_deposit: u128::from(settings.safety_deposit),
        auto_process: settings.auto_process,
    }
}

pub fn tracing_options(logging: &LoggingConfig) -> TracingOptions {
    TracingOptions {
        filter: logging.filter_directives(),
        json: logging.json,
    }
}

/// Install the global tracing subscriber described by `[logging]`.
/// ERROR events are counted on `metrics`, normally the coordinator's own
/// collector.
pub fn init_tracing(config: &AppConfig, metrics: Arc<MetricsCollector>) -> anyhow::Result<()> {
    htlc_bridge_metrics::init_tracing(&tracing_options(&config.logging), metrics)
        .context("failed to initialise tracing")
}

/// A configured coordinator: orchestrator, ledger and the chains it drives
pub struct Coordinator {
    orchestrator: SwapOrchestrator,
    ledger: Arc<LiquidityLedger>,
    metrics: Arc<MetricsCollector>,
    simulated: BTreeMap<ChainId, Arc<SimulatedChain>>,
}

impl Coordinator {
    /// Build a coordinator over simulated chains on the system clock
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Self::simulated(config, Arc::new(SystemClock))
    }

    /// Build a coordinator over one [`SimulatedChain`] per configured chain
    pub fn simulated(config: &AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let mut simulated = BTreeMap::new();
        for chain in config.chains.values() {
            let driver = SimulatedChain::new(chain.chain_id.clone(), chain.kind, clock.clone())
                .with_latency(Duration::from_millis(chain.simulated_latency_ms));
            simulated.insert(ChainId::new(chain.chain_id.clone()), Arc::new(driver));
        }

        let gateways = simulated
            .values()
            .map(|chain| chain.clone() as Arc<dyn ChainGateway>)
            .collect();
        let mut coordinator = Self::with_gateways(config, gateways, clock)?;
        coordinator.simulated = simulated;
        Ok(coordinator)
    }

    /// Build a coordinator over externally supplied gateways. Every gateway
    /// must correspond to a configured chain.
    pub fn with_gateways(
        config: &AppConfig,
        gateways: Vec<Arc<dyn ChainGateway>>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        validate_config(config).context("invalid configuration")?;

        let ledger = Arc::new(LiquidityLedger::new());
        for seed in &config.liquidity {
            // validate_config guarantees the chain exists
            let Some(chain) = config.chains.get(&seed.chain) else {
                bail!("liquidity seed references unknown chain '{}'", seed.chain);
            };
            ledger
                .deposit(
                    &ChainId::new(chain.chain_id.clone()),
                    &TokenId::new(seed.token.clone()),
                    u128::from(seed.amount),
                )
                .with_context(|| format!("failed to seed {}/{}", chain.chain_id, seed.token))?;
        }

        let metrics = Arc::new(MetricsCollector::new());
        let mut builder = SwapOrchestrator::builder()
            .with_config(orchestrator_config(config))
            .with_ledger(ledger.clone())
            .with_clock(clock)
            .with_metrics(metrics.clone());

        for gateway in gateways {
            let chain_id = gateway.chain_id().clone();
            let Some(chain) = config
                .chains
                .values()
                .find(|c| c.chain_id == chain_id.as_str())
            else {
                bail!("gateway for {chain_id} has no [chains] entry");
            };
            builder = builder.with_gateway(gateway, chain.resolver_address.clone());
        }

        let orchestrator = builder.build().context("failed to build orchestrator")?;
        info!(
            environment = ?config.environment,
            chains = config.chains.len(),
            max_in_flight = config.orchestrator.max_in_flight,
            "coordinator configured"
        );

        Ok(Self {
            orchestrator,
            ledger,
            metrics,
            simulated: BTreeMap::new(),
        })
    }

    pub fn orchestrator(&self) -> &SwapOrchestrator {
        &self.orchestrator
    }

    pub fn ledger(&self) -> &Arc<LiquidityLedger> {
        &self.ledger
    }

    /// Collector shared by the orchestrator; pass it to [`init_tracing`]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The simulated driver for `chain`, when built by [`Coordinator::simulated`]
    pub fn simulated_chain(&self, chain: &ChainId) -> Option<&Arc<SimulatedChain>> {
        self.simulated.get(chain)
    }

    /// Start the event loop and the recovery sweep
    pub fn start(&self) {
        self.orchestrator.start();
    }

    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
