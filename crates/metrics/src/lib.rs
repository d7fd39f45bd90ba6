//! Metrics and tracing for the HTLC bridge coordinator
//!
//! - Prometheus counters, gauges and histograms for swaps, chain calls,
//!   liquidity and recovery
//! - Tracing initialisation with an error-counting layer
//! - Per-swap spans carrying a correlation id
//!
//! # Example
//!
//! ```no_run
//! use htlc_bridge_metrics::{init_tracing, MetricsCollector, TracingOptions};
//! use std::sync::Arc;
//!
//! let collector = Arc::new(MetricsCollector::new());
//! init_tracing(&TracingOptions::default(), collector.clone()).unwrap();
//!
//! collector.record_swap_initiated("sepolia", "devnet");
//! println!("{}", collector.export_metrics().unwrap());
//! ```

pub mod collector;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError};
pub use crate::tracing::{
    init_tracing, CorrelationId, MetricsLayer, SwapSpan, TracingError, TracingOptions,
    DEFAULT_FILTER,
};
