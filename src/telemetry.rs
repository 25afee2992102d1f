use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::board::ItemId;
use crate::config::ObservabilityConfig;
use crate::runs::AgentKind;

/// Initialize structured logging. Output goes to stderr so that NDJSON
/// written to stdout stays machine-readable.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    tracing::debug!("Lanekeeper telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one coordinator invocation. `run.id` is recorded once known.
pub fn create_coordination_span(
    operation: &str,
    item_id: &ItemId,
    agent_kind: AgentKind,
    run_id: Option<&str>,
    correlation_id: &str,
) -> tracing::Span {
    let span = tracing::info_span!(
        "run_coordination",
        operation = operation,
        item.id = %item_id,
        agent.kind = %agent_kind,
        run.id = tracing::field::Empty,
        correlation.id = correlation_id,
    );
    if let Some(run_id) = run_id {
        span.record("run.id", run_id);
    }
    span
}
