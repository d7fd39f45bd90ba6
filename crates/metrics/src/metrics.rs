use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // SWAP METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Swaps accepted by the orchestrator, by chain pair
    pub static ref SWAPS_INITIATED: IntCounterVec = register_int_counter_vec!(
        "htlc_bridge_swaps_initiated_total",
        "Total number of swaps accepted",
        &["source_chain", "dest_chain"]
    )
    .unwrap();

    /// Swaps that reached a terminal state, by state
    pub static ref SWAPS_FINISHED: IntCounterVec = register_int_counter_vec!(
        "htlc_bridge_swaps_finished_total",
        "Total swaps by terminal state",
        &["state"]
    )
    .unwrap();

    /// Swap requests rejected before processing, by reason
    pub static ref SWAP_REJECTIONS: IntCounterVec = register_int_counter_vec!(
        "htlc_bridge_swap_rejections_total",
        "Total swap requests rejected at initiation",
        &["reason"]
    )
    .unwrap();

    /// Current number of non-terminal swaps
    pub static ref SWAPS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "htlc_bridge_swaps_in_flight",
        "Current number of in-flight swaps"
    )
    .unwrap();

    /// Swaps parked for operator intervention
    pub static ref SWAPS_PARKED: IntCounter = register_int_counter!(
        "htlc_bridge_swaps_parked_total",
        "Total swaps parked for manual intervention"
    )
    .unwrap();

    /// Time from initiation to terminal state (seconds)
    pub static ref SWAP_DURATION: Histogram = register_histogram!(
        "htlc_bridge_swap_duration_seconds",
        "Swap duration from initiation to terminal state in seconds",
        vec![30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // CHAIN METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Chain call retries, by operation
    pub static ref CHAIN_CALL_RETRIES: IntCounterVec = register_int_counter_vec!(
        "htlc_bridge_chain_call_retries_total",
        "Total retried chain calls",
        &["operation"]
    )
    .unwrap();

    /// Chain call failures after retry, by operation and error kind
    pub static ref CHAIN_CALL_FAILURES: IntCounterVec = register_int_counter_vec!(
        "htlc_bridge_chain_call_failures_total",
        "Total chain calls that failed after retry",
        &["operation", "kind"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDITY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Liquidity currently held by reservations
    pub static ref LOCKED_LIQUIDITY: GaugeVec = register_gauge_vec!(
        "htlc_bridge_locked_liquidity",
        "Liquidity locked by active reservations",
        &["chain", "token"]
    )
    .unwrap();

    /// Liquidity free for new reservations
    pub static ref AVAILABLE_LIQUIDITY: GaugeVec = register_gauge_vec!(
        "htlc_bridge_available_liquidity",
        "Liquidity available for new reservations",
        &["chain", "token"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Actions taken by the recovery sweep
    pub static ref RECOVERY_ACTIONS: IntCounterVec = register_int_counter_vec!(
        "htlc_bridge_recovery_actions_total",
        "Total recovery sweep actions",
        &["action"]
    )
    .unwrap();

    /// Number of recovery sweeps run
    pub static ref RECOVERY_SWEEPS: IntCounter = register_int_counter!(
        "htlc_bridge_recovery_sweeps_total",
        "Total recovery sweeps"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // ERROR METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// ERROR-level log events by their error_kind field
    pub static ref ERROR_EVENTS: IntCounterVec = register_int_counter_vec!(
        "htlc_bridge_error_events_total",
        "Error log events by kind",
        &["error_kind"]
    )
    .unwrap();
}
