use htlc_bridge_retry::RetryPolicy;
use htlc_bridge_types::TimelockWindows;
use std::time::Duration;

/// Configuration for the swap orchestrator
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Maximum non-terminal swaps; further requests fail with `CapacityExceeded`
    pub max_in_flight: usize,

    /// Extra wait past the finality deadline before any withdrawal
    pub finality_margin: Duration,

    /// Minimum time that must remain before the earlier public deadline for
    /// the secret to be revealed
    pub reveal_margin: Duration,

    /// Re-check interval while waiting on deadlines
    pub poll_interval: Duration,

    /// Timeout applied to every chain call
    pub chain_call_timeout: Duration,

    /// A non-terminal swap untouched for this long is picked up by recovery
    pub stale_after: Duration,

    /// Period of the background recovery sweep
    pub sweep_interval: Duration,

    pub timelocks: TimelockWindows,

    pub retry: RetryPolicy,

    /// Native-token incentive attached to every escrow
    pub safety_deposit: u128,

    /// Spawn a processing task for every accepted swap
    pub auto_process: bool,
}

impl OrchestratorConfig {
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn with_timelocks(mut self, timelocks: TimelockWindows) -> Self {
        self.timelocks = timelocks;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reveal_margin(mut self, margin: Duration) -> Self {
        self.reveal_margin = margin;
        self
    }

    pub fn with_auto_process(mut self, enabled: bool) -> Self {
        self.auto_process = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_in_flight == 0 {
            return Err("max_in_flight must be greater than zero".to_string());
        }
        if self.safety_deposit == 0 {
            return Err("safety_deposit must be greater than zero".to_string());
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than zero".to_string());
        }
        if self.chain_call_timeout.is_zero() {
            return Err("chain_call_timeout must be greater than zero".to_string());
        }
        self.timelocks.validate().map_err(|e| e.to_string())?;
        if self.reveal_margin >= self.timelocks.public {
            return Err(format!(
                "reveal_margin ({:?}) must be shorter than the public window ({:?})",
                self.reveal_margin, self.timelocks.public
            ));
        }
        self.retry.validate()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            finality_margin: Duration::from_secs(5),
            reveal_margin: Duration::from_secs(300), // 5 minutes
            poll_interval: Duration::from_secs(5),
            chain_call_timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(900), // 15 minutes
            sweep_interval: Duration::from_secs(60),
            timelocks: TimelockWindows::default(),
            retry: RetryPolicy::default(),
            safety_deposit: 1_000_000,
            auto_process: true,
        }
    }
}
