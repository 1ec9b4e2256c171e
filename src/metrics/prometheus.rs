//! Prometheus metrics registration and export.

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all reviewer metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Completed reviews, labeled by outcome (`evaluated` or the failed stage).
pub static REVIEWS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Review stage duration in seconds, labeled by stage.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Executed test plans, labeled by outcome (`passed` or `failed`).
pub static PLAN_OUTCOMES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Failed calls to the agent under test, labeled by endpoint.
pub static AGENT_TRANSPORT_ERRORS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Failed acceptance-oracle calls, labeled by phase (`step` or `final`).
pub static ORACLE_ERRORS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the global registry.
///
/// Calling it again is harmless: the first registration wins.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    static INIT_LOCK: Mutex<()> = Mutex::new(());
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let reviews_total = CounterVec::new(
        Opts::new("template_reviewer_reviews_total", "Total reviews run"),
        &["outcome"],
    )?;

    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "template_reviewer_stage_duration_seconds",
            "Review stage duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
        &["stage"],
    )?;

    let plan_outcomes_total = CounterVec::new(
        Opts::new(
            "template_reviewer_plan_outcomes_total",
            "Executed test plans by outcome",
        ),
        &["outcome"],
    )?;

    let agent_transport_errors_total = CounterVec::new(
        Opts::new(
            "template_reviewer_agent_transport_errors_total",
            "Failed calls to the agent under test",
        ),
        &["endpoint"],
    )?;

    let oracle_errors_total = CounterVec::new(
        Opts::new(
            "template_reviewer_oracle_errors_total",
            "Failed acceptance oracle calls",
        ),
        &["phase"],
    )?;

    registry.register(Box::new(reviews_total.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(plan_outcomes_total.clone()))?;
    registry.register(Box::new(agent_transport_errors_total.clone()))?;
    registry.register(Box::new(oracle_errors_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = REVIEWS_TOTAL.set(reviews_total);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = PLAN_OUTCOMES_TOTAL.set(plan_outcomes_total);
    let _ = AGENT_TRANSPORT_ERRORS_TOTAL.set(agent_transport_errors_total);
    let _ = ORACLE_ERRORS_TOTAL.set(oracle_errors_total);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry is not
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
