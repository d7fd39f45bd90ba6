//! Configuration validation

use crate::{AppConfig, ChainConfig, ConfigError, Result};
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration, reporting every violation
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    if let Err(e) = validate_log_level(&config.logging.level) {
        errors.push(e);
    }

    if config.metrics.enabled && config.metrics.port == 0 {
        errors.push(ValidationError::new(
            "metrics.port",
            "metrics port must be greater than 0",
        ));
    }

    // Orchestrator
    let orchestrator = &config.orchestrator;
    if orchestrator.max_in_flight == 0 {
        errors.push(ValidationError::new(
            "orchestrator.max_in_flight",
            "must be greater than 0",
        ));
    }
    if orchestrator.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "orchestrator.poll_interval_ms",
            "must be greater than 0",
        ));
    }
    if orchestrator.chain_call_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "orchestrator.chain_call_timeout_ms",
            "must be greater than 0",
        ));
    }
    if orchestrator.stale_after_secs == 0 {
        errors.push(ValidationError::new(
            "orchestrator.stale_after_secs",
            "must be greater than 0",
        ));
    }
    if orchestrator.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "orchestrator.sweep_interval_secs",
            "must be greater than 0",
        ));
    }
    if orchestrator.safety_deposit == 0 {
        errors.push(ValidationError::new(
            "orchestrator.safety_deposit",
            "must be greater than 0",
        ));
    }

    // Timelocks
    let timelocks = &config.timelocks;
    for (field, value) in [
        ("timelocks.finality_secs", timelocks.finality_secs),
        ("timelocks.resolver_exclusive_secs", timelocks.resolver_exclusive_secs),
        ("timelocks.public_secs", timelocks.public_secs),
        ("timelocks.cancellation_delay_secs", timelocks.cancellation_delay_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "window must be greater than 0"));
        }
    }
    if orchestrator.reveal_margin_secs >= timelocks.public_secs {
        errors.push(ValidationError::new(
            "orchestrator.reveal_margin_secs",
            format!(
                "must be shorter than the public window ({}s)",
                timelocks.public_secs
            ),
        ));
    }

    // Retry
    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new(
            "retry.max_attempts",
            "must be at least 1",
        ));
    }
    if retry.multiplier < 1.0 {
        errors.push(ValidationError::new("retry.multiplier", "must be >= 1.0"));
    }
    if !(0.0..=1.0).contains(&retry.jitter_fraction) {
        errors.push(ValidationError::new(
            "retry.jitter_fraction",
            "must be within [0, 1]",
        ));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.initial_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }

    // Chains
    if config.chains.len() < 2 {
        errors.push(ValidationError::new(
            "chains",
            "at least two chains must be configured",
        ));
    }

    let mut chain_ids = HashSet::new();
    for (name, chain) in &config.chains {
        if let Err(e) = validate_chain_config(chain) {
            errors.push(ValidationError::new(format!("chains.{name}"), e));
        }
        if !chain_ids.insert(chain.chain_id.as_str()) {
            errors.push(ValidationError::new(
                format!("chains.{name}.chain_id"),
                format!("duplicate chain id '{}'", chain.chain_id),
            ));
        }
    }

    // Liquidity
    for (idx, seed) in config.liquidity.iter().enumerate() {
        if !config.chains.contains_key(&seed.chain) {
            errors.push(ValidationError::new(
                format!("liquidity[{idx}].chain"),
                format!("chain '{}' not found in chains config", seed.chain),
            ));
        }
        if seed.token.is_empty() {
            errors.push(ValidationError::new(
                format!("liquidity[{idx}].token"),
                "token is required",
            ));
        }
        if seed.amount == 0 {
            errors.push(ValidationError::new(
                format!("liquidity[{idx}].amount"),
                "must be greater than 0",
            ));
        }
    }

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate a chain configuration
pub fn validate_chain_config(chain: &ChainConfig) -> std::result::Result<(), String> {
    if chain.chain_id.is_empty() {
        return Err("chain_id is required".to_string());
    }

    chain
        .kind
        .validate_address(&chain.resolver_address)
        .map_err(|e| format!("resolver_address: {e}"))
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "logging.level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LiquiditySeed, OrchestratorSettings};
    use htlc_bridge_types::ChainKind;

    fn chain(chain_id: &str, kind: ChainKind, resolver: &str) -> ChainConfig {
        ChainConfig {
            chain_id: chain_id.to_string(),
            kind,
            resolver_address: resolver.to_string(),
            simulated_latency_ms: 0,
        }
    }

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.chains.insert(
            "sepolia".into(),
            chain(
                "sepolia",
                ChainKind::Evm,
                "0x1111111111111111111111111111111111111111",
            ),
        );
        config.chains.insert(
            "devnet".into(),
            chain(
                "devnet",
                ChainKind::Solana,
                "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM",
            ),
        );
        config.liquidity.push(LiquiditySeed {
            chain: "devnet".into(),
            token: "usdc".into(),
            amount: 1_000,
        });
        config
    }

    fn message(config: &AppConfig) -> String {
        match validate_config(config) {
            Err(ConfigError::ValidationError(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = valid_config();
        config.logging.level = "verbose".into();
        assert!(message(&config).contains("logging.level"));
    }

    #[test]
    fn test_reveal_margin_must_fit_public_window() {
        let mut config = valid_config();
        config.orchestrator = OrchestratorSettings {
            reveal_margin_secs: config.timelocks.public_secs,
            ..Default::default()
        };
        assert!(message(&config).contains("orchestrator.reveal_margin_secs"));
    }

    #[test]
    fn test_collects_every_violation() {
        let mut config = valid_config();
        config.timelocks.finality_secs = 0;
        config.retry.multiplier = 0.5;
        config.retry.jitter_fraction = 1.5;
        config.orchestrator.max_in_flight = 0;

        let msg = message(&config);
        assert!(msg.contains("timelocks.finality_secs"));
        assert!(msg.contains("retry.multiplier"));
        assert!(msg.contains("retry.jitter_fraction"));
        assert!(msg.contains("orchestrator.max_in_flight"));
    }

    #[test]
    fn test_duplicate_chain_ids() {
        let mut config = valid_config();
        config.chains.insert(
            "sepolia-2".into(),
            chain(
                "sepolia",
                ChainKind::Evm,
                "0x3333333333333333333333333333333333333333",
            ),
        );
        assert!(message(&config).contains("duplicate chain id 'sepolia'"));
    }

    #[test]
    fn test_resolver_address_must_match_chain_kind() {
        let mut config = valid_config();
        config.chains.insert(
            "devnet".into(),
            chain(
                "devnet",
                ChainKind::Solana,
                "0x1111111111111111111111111111111111111111",
            ),
        );
        assert!(message(&config).contains("chains.devnet"));
    }

    #[test]
    fn test_liquidity_must_reference_configured_chain() {
        let mut config = valid_config();
        config.liquidity.push(LiquiditySeed {
            chain: "mainnet-beta".into(),
            token: "usdc".into(),
            amount: 0,
        });
        let msg = message(&config);
        assert!(msg.contains("liquidity[1].chain"));
        assert!(msg.contains("liquidity[1].amount"));
    }

    #[test]
    fn test_validate_chain_config() {
        let valid = chain(
            "sepolia",
            ChainKind::Evm,
            "0x1111111111111111111111111111111111111111",
        );
        assert!(validate_chain_config(&valid).is_ok());

        let invalid = ChainConfig {
            chain_id: String::new(),
            ..valid
        };
        assert!(validate_chain_config(&invalid).is_err());
    }
}
