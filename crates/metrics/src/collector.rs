use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Metrics collector for the HTLC bridge coordinator.
///
/// A thin handle over the process-wide prometheus registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SWAP METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a swap accepted for processing
    pub fn record_swap_initiated(&self, source_chain: &str, dest_chain: &str) {
        SWAPS_INITIATED
            .with_label_values(&[source_chain, dest_chain])
            .inc();
        SWAPS_IN_FLIGHT.inc();
    }

    /// Record a swap reaching `state` (completed, failed, refunded)
    pub fn record_swap_finished(&self, state: &str, duration: Duration) {
        SWAPS_FINISHED.with_label_values(&[state]).inc();
        SWAPS_IN_FLIGHT.dec();
        SWAP_DURATION.observe(duration.as_secs_f64());
    }

    pub fn record_rejection(&self, reason: &str) {
        SWAP_REJECTIONS.with_label_values(&[reason]).inc();
    }

    pub fn record_swap_parked(&self) {
        SWAPS_PARKED.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CHAIN METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_chain_retry(&self, operation: &str) {
        CHAIN_CALL_RETRIES.with_label_values(&[operation]).inc();
    }

    pub fn record_chain_failure(&self, operation: &str, kind: &str) {
        CHAIN_CALL_FAILURES
            .with_label_values(&[operation, kind])
            .inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDITY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Publish the balances of one (chain, token)
    pub fn set_liquidity(&self, chain: &str, token: &str, locked: u128, available: u128) {
        LOCKED_LIQUIDITY
            .with_label_values(&[chain, token])
            .set(locked as f64);
        AVAILABLE_LIQUIDITY
            .with_label_values(&[chain, token])
            .set(available as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_recovery_sweep(&self) {
        RECOVERY_SWEEPS.inc();
    }

    pub fn record_recovery_action(&self, action: &str) {
        RECOVERY_ACTIONS.with_label_values(&[action]).inc();
    }

    pub fn record_error_event(&self, error_kind: &str) {
        ERROR_EVENTS.with_label_values(&[error_kind]).inc();
    }

    /// Render every registered metric in the prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        assert!(collector.export_metrics().is_ok());
    }

    #[test]
    fn test_record_swap_metrics() {
        let collector = MetricsCollector::new();
        collector.record_swap_initiated("sepolia", "devnet");
        collector.record_swap_finished("completed", Duration::from_secs(90));
        collector.record_rejection("capacity_exceeded");
        collector.record_swap_parked();

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("htlc_bridge_swaps_initiated_total"));
        assert!(metrics.contains("htlc_bridge_swaps_finished_total"));
        assert!(metrics.contains("htlc_bridge_swap_rejections_total"));
        assert!(metrics.contains("htlc_bridge_swap_duration_seconds"));
        assert!(metrics.contains("htlc_bridge_swaps_parked_total"));
    }

    #[test]
    fn test_record_chain_metrics() {
        let collector = MetricsCollector::new();
        collector.record_chain_retry("create_escrow");
        collector.record_chain_failure("withdraw", "reverted");

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("htlc_bridge_chain_call_retries_total"));
        assert!(metrics.contains("operation=\"create_escrow\""));
        assert!(metrics.contains("kind=\"reverted\""));
    }

    #[test]
    fn test_liquidity_gauges() {
        let collector = MetricsCollector::new();
        collector.set_liquidity("metrics-test-chain", "usdc", 250, 750);

        assert_eq!(
            LOCKED_LIQUIDITY
                .with_label_values(&["metrics-test-chain", "usdc"])
                .get(),
            250.0
        );
        assert_eq!(
            AVAILABLE_LIQUIDITY
                .with_label_values(&["metrics-test-chain", "usdc"])
                .get(),
            750.0
        );
    }

    #[test]
    fn test_recovery_metrics() {
        let collector = MetricsCollector::new();
        collector.record_recovery_sweep();
        collector.record_recovery_action("resumed");

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("htlc_bridge_recovery_sweeps_total"));
        assert!(metrics.contains("action=\"resumed\""));
    }
}
