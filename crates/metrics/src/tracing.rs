use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{field::Visit, Event, Level, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::collector::MetricsCollector;

pub const DEFAULT_FILTER: &str = "info,htlc_bridge=debug";

/// Subscriber options, usually taken from the `[logging]` config section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingOptions {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

/// Initialize tracing with metrics integration
pub fn init_tracing(
    options: &TracingOptions,
    collector: Arc<MetricsCollector>,
) -> Result<(), TracingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.filter)
            .map_err(|e| TracingError::InvalidFilter(e.to_string()))?,
    };

    let metrics_layer = MetricsLayer::new(collector);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(metrics_layer);

    let result = if options.json {
        registry
            .with(fmt::layer().with_target(true).with_level(true).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };

    result.map_err(|e| TracingError::InitError(e.to_string()))
}

/// Tracing layer counting ERROR events by their `error_kind` field
pub struct MetricsLayer {
    collector: Arc<MetricsCollector>,
}

impl MetricsLayer {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = ErrorKindVisitor::default();
        event.record(&mut visitor);
        let kind = visitor.error_kind.as_deref().unwrap_or("unclassified");
        self.collector.record_error_event(kind);
    }
}

#[derive(Default)]
struct ErrorKindVisitor {
    error_kind: Option<String>,
}

impl Visit for ErrorKindVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "error_kind" {
            self.error_kind = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "error_kind" {
            self.error_kind = Some(value.to_string());
        }
    }
}

/// Correlation ID for following one swap across components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one swap's processing
#[derive(Debug, Clone)]
pub struct SwapSpan {
    pub correlation_id: CorrelationId,
    pub swap_id: String,
    pub route: String,
}

impl SwapSpan {
    pub fn new(swap_id: impl Into<String>, source_chain: &str, dest_chain: &str) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            swap_id: swap_id.into(),
            route: format!("{source_chain}->{dest_chain}"),
        }
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "swap",
            correlation_id = %self.correlation_id,
            swap_id = %self.swap_id,
            route = %self.route,
        )
    }

    /// Enter a tracing span for this swap
    pub fn enter(&self) -> tracing::span::EnteredSpan {
        self.span().entered()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),

    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
}
