use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

use crate::engine::EngineError;

// ── Request-driven metrics ───────────────────────────────────────

/// Counter: submissions handled. Labels: outcome.
pub const SUBMISSIONS_TOTAL: &str = "bookdesk_submissions_total";

/// Counter: reservation rows created by accepted submissions.
pub const RESERVATIONS_CREATED_TOTAL: &str = "bookdesk_reservations_created_total";

/// Counter: status transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "bookdesk_transitions_total";

/// Counter: failed engine operations. Labels: operation, kind.
pub const ENGINE_ERRORS_TOTAL: &str = "bookdesk_engine_errors_total";

/// Histogram: repository call latency in seconds. Labels: operation.
pub const REPOSITORY_DURATION_SECONDS: &str = "bookdesk_repository_duration_seconds";

// ── Store internals ──────────────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "bookdesk_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "bookdesk_journal_flush_batch_size";

/// Counter: journal compactions completed.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "bookdesk_journal_compactions_total";

/// Install the global fmt subscriber. `filter` uses `EnvFilter` syntax,
/// e.g. `"info,bookdesk=debug"`. Returns false if a subscriber was already
/// installed, which leaves the existing one in place.
pub fn init_tracing(filter: &str) -> Result<bool, ParseError> {
    let filter = EnvFilter::try_new(filter)?;
    Ok(tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok())
}

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for an error, for metrics.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::Validation(_) => "validation",
        EngineError::Conflict(_) => "conflict",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::Forbidden { .. } => "forbidden",
        EngineError::EmptyExpansion { .. } => "empty_expansion",
        EngineError::NotFound(_) => "not_found",
        EngineError::Infrastructure(_) => "infrastructure",
    }
}
