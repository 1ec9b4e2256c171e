//! Recording helpers over the raw Prometheus statics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) ran,
//! so library code can record unconditionally.

use super::prometheus::{
    AGENT_TRANSPORT_ERRORS_TOTAL, ORACLE_ERRORS_TOTAL, PLAN_OUTCOMES_TOTAL, REVIEWS_TOTAL,
    STAGE_DURATION,
};

/// Metrics recorder shared by the review stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record how long a review stage took.
    pub fn record_stage(&self, stage: &str, duration_secs: f64) {
        if let Some(histogram) = STAGE_DURATION.get() {
            histogram.with_label_values(&[stage]).observe(duration_secs);
        }
        tracing::trace!(stage, duration_secs, "Recorded stage metric");
    }

    /// Record the final outcome of one test plan.
    pub fn record_plan_outcome(&self, passed: bool) {
        if let Some(counter) = PLAN_OUTCOMES_TOTAL.get() {
            let outcome = if passed { "passed" } else { "failed" };
            counter.with_label_values(&[outcome]).inc();
        }
    }

    /// Record a failed call to the agent under test.
    pub fn record_transport_error(&self, endpoint: &str) {
        if let Some(counter) = AGENT_TRANSPORT_ERRORS_TOTAL.get() {
            counter.with_label_values(&[endpoint]).inc();
        }
    }

    /// Record a failed acceptance-oracle call.
    pub fn record_oracle_error(&self, phase: &str) {
        if let Some(counter) = ORACLE_ERRORS_TOTAL.get() {
            counter.with_label_values(&[phase]).inc();
        }
    }

    /// Record the end of a review; `outcome` is `evaluated` or the failed stage.
    pub fn record_review(&self, outcome: &str) {
        if let Some(counter) = REVIEWS_TOTAL.get() {
            counter.with_label_values(&[outcome]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_collector_records_after_init() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();

        collector.record_stage("clone", 1.5);
        collector.record_plan_outcome(false);
        collector.record_transport_error("generate");
        collector.record_oracle_error("step");
        collector.record_review("evaluated");

        let metrics = export_metrics();
        assert!(metrics.contains("template_reviewer_stage_duration_seconds"));
        assert!(metrics.contains("endpoint=\"generate\""));
        assert!(metrics.contains("phase=\"step\""));
    }
}
