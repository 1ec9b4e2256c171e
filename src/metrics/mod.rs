//! Prometheus metrics for review runs.
//!
//! ```ignore
//! use template_reviewer::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_plan_outcome(true);
//! std::fs::write("review.prom", export_metrics())?;
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, REGISTRY};
