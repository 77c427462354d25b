//! Embeddable monitoring for web scrapers.
//!
//! Provides Prometheus-compatible metrics collection, health check
//! evaluation, and per-operation tracking for a host scraper process. The
//! library produces the data; serving it (HTTP endpoints, log shipping,
//! alerting) is the embedding application's job.
//!
//! # Features
//!
//! - Metric registry with declared schemas (counters, gauges, histograms)
//! - Built-in scraper catalog (requests, durations, items, errors, HTTP,
//!   rate limiting, CPU/memory gauges)
//! - Health check registry with liveness/readiness/full scopes, built-in
//!   resource probes, and custom async probes
//! - Operation scopes with exactly-once close accounting
//! - Prometheus text exposition of metric snapshots
//!
//! # Example
//!
//! ```ignore
//! use scraper_monitoring::{MonitoringConfig, MonitoringContext};
//!
//! let context = MonitoringContext::start(MonitoringConfig::new("shop-crawler"))?;
//!
//! let scope = context.begin_operation("fetch", "https://example.com/p/1")?;
//! scope.record_items("product", 12);
//! scope.success();
//!
//! let body = context.render_metrics()?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod exposition;
pub mod health;
pub mod hooks;
pub mod logging;
pub mod registry;
pub mod tracker;

pub use config::{LogFormat, MonitoringConfig, ResourceThresholds, ScraperIdentity};
pub use context::MonitoringContext;
pub use error::{MonitoringError, Result};
pub use exposition::render_prometheus;
pub use health::{
    EvaluationScope, HealthRegistry, HealthSnapshot, HealthState, ProbeFn, ProbeKind,
    ProbeReport, ProbeStatus, ResourceMonitor,
};
pub use hooks::{HostLifecycle, LoggingLifecycle};
pub use logging::init_logging;
pub use registry::{
    AggregateValue, MetricKind, MetricRegistry, SampleSnapshot, SeriesSnapshot,
};
pub use tracker::{OperationOutcome, OperationScope, track, track_async};
