//! Core configuration structures for the HTLC bridge coordinator

use htlc_bridge_retry::RetryPolicy;
use htlc_bridge_types::{ChainKind, TimelockWindows};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment profile
    pub environment: Environment,

    /// Log output
    pub logging: LoggingConfig,

    /// Prometheus metrics
    pub metrics: MetricsConfig,

    /// Swap processing limits and margins
    pub orchestrator: OrchestratorSettings,

    /// Escrow timelock windows
    pub timelocks: TimelockConfig,

    /// Retry budget for chain calls
    pub retry: RetryConfig,

    /// Chains by name
    pub chains: BTreeMap<String, ChainConfig>,

    /// Initial coordinator liquidity
    pub liquidity: Vec<LiquiditySeed>,
}

/// Environment types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    Testnet,
    #[default]
    Local,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Full `EnvFilter` directives; overrides `level` when set
    pub filter: Option<String>,

    /// Emit JSON lines
    pub json: bool,
}

impl LoggingConfig {
    /// Filter directives handed to the tracing subscriber
    pub fn filter_directives(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => format!("{},htlc_bridge=debug", self.level.to_lowercase()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: None,
            json: false,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,

    /// Port a metrics exporter binds to
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

/// Swap processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Maximum number of non-terminal swaps
    pub max_in_flight: usize,

    /// Extra wait past the finality deadline before revealing
    pub finality_margin_secs: u64,

    /// Minimum time left before the public deadline for a reveal
    pub reveal_margin_secs: u64,

    /// Re-check interval while waiting on chain state
    pub poll_interval_ms: u64,

    /// Timeout for a single chain call
    pub chain_call_timeout_ms: u64,

    /// Age after which a non-terminal swap is picked up by recovery
    pub stale_after_secs: u64,

    /// Recovery sweep period
    pub sweep_interval_secs: u64,

    /// Native-token incentive locked in every escrow
    pub safety_deposit: u64,

    /// Process swaps in the background as soon as they are admitted
    pub auto_process: bool,
}

impl OrchestratorSettings {
    pub fn finality_margin(&self) -> Duration {
        Duration::from_secs(self.finality_margin_secs)
    }

    pub fn reveal_margin(&self) -> Duration {
        Duration::from_secs(self.reveal_margin_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn chain_call_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_call_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            finality_margin_secs: 5,
            reveal_margin_secs: 300, // 5 minutes
            poll_interval_ms: 5000,
            chain_call_timeout_ms: 30000,
            stale_after_secs: 900, // 15 minutes
            sweep_interval_secs: 60,
            safety_deposit: 1_000_000,
            auto_process: true,
        }
    }
}

/// Escrow timelock windows, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelockConfig {
    pub finality_secs: u64,
    pub resolver_exclusive_secs: u64,
    pub public_secs: u64,
    pub cancellation_delay_secs: u64,
}

impl TimelockConfig {
    pub fn windows(&self) -> TimelockWindows {
        TimelockWindows {
            finality: Duration::from_secs(self.finality_secs),
            resolver_exclusive: Duration::from_secs(self.resolver_exclusive_secs),
            public: Duration::from_secs(self.public_secs),
            cancellation_delay: Duration::from_secs(self.cancellation_delay_secs),
        }
    }
}

impl Default for TimelockConfig {
    fn default() -> Self {
        let windows = TimelockWindows::default();
        Self {
            finality_secs: windows.finality.as_secs(),
            resolver_exclusive_secs: windows.resolver_exclusive.as_secs(),
            public_secs: windows.public.as_secs(),
            cancellation_delay_secs: windows.cancellation_delay.as_secs(),
        }
    }
}

/// Retry configuration for chain calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Random stretch of each delay, within [0, 1]
    pub jitter_fraction: f64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_multiplier(self.multiplier)
        .with_jitter(self.jitter_fraction)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter_fraction: policy.jitter_fraction,
        }
    }
}

/// Configuration for one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier used in swap requests
    pub chain_id: String,

    /// Address format of the chain
    pub kind: ChainKind,

    /// Coordinator address on this chain
    pub resolver_address: String,

    /// Artificial latency of the simulated driver, in milliseconds
    #[serde(default)]
    pub simulated_latency_ms: u64,
}

/// Coordinator balance deposited into the ledger at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquiditySeed {
    /// Chain name, a key of `chains`
    pub chain: String,
    pub token: String,
    pub amount: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}
