//! Monitoring context: the single handle an embedding scraper holds.
//!
//! [`MonitoringContext::start`] wires the pieces together: it builds the
//! metric registry with the built-in scraper catalog declared, builds the
//! health registry, and spawns the background task that samples CPU and
//! memory into gauges. [`shutdown`](MonitoringContext::shutdown) stops the
//! sampler, flips the context closed, and hands back the final metrics
//! snapshot; any context call after that fails with
//! [`MonitoringError::ContextClosed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MonitoringConfig, ScraperIdentity};
use crate::error::{MonitoringError, Result};
use crate::exposition::render_prometheus;
use crate::health::{
    EvaluationScope, HealthRegistry, HealthSnapshot, ProbeFn, ResourceMonitor,
};
use crate::registry::{MetricKind, MetricRegistry, SeriesSnapshot};
use crate::tracker::{self, OperationScope};

pub const SCRAPER_REQUESTS_TOTAL: &str = "scraper_requests_total";
pub const SCRAPER_DURATION_SECONDS: &str = "scraper_duration_seconds";
pub const SCRAPER_ITEMS_SCRAPED_TOTAL: &str = "scraper_items_scraped_total";
pub const SCRAPER_ERRORS_TOTAL: &str = "scraper_errors_total";
pub const SCRAPER_HTTP_REQUESTS_TOTAL: &str = "scraper_http_requests_total";
pub const SCRAPER_HTTP_RESPONSE_DURATION_SECONDS: &str =
    "scraper_http_response_duration_seconds";
pub const SCRAPER_SYSTEM_CPU_USAGE_PERCENT: &str = "scraper_system_cpu_usage_percent";
pub const SCRAPER_SYSTEM_MEMORY_USAGE_BYTES: &str = "scraper_system_memory_usage_bytes";
pub const SCRAPER_RATE_LIMIT_DELAYS_TOTAL: &str = "scraper_rate_limit_delays_total";
pub const SCRAPER_RATE_LIMIT_DELAY_SECONDS: &str = "scraper_rate_limit_delay_seconds";

/// Rate-limit delays run much longer than request latencies, so the delay
/// histogram gets its own coarser boundaries.
const RATE_LIMIT_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Declare the built-in scraper series. Idempotent.
pub(crate) fn declare_builtin_catalog(registry: &MetricRegistry) -> Result<()> {
    registry.declare(
        SCRAPER_REQUESTS_TOTAL,
        MetricKind::Counter,
        &["operation", "status"],
        "Total scraping operations by outcome",
    )?;
    registry.declare(
        SCRAPER_DURATION_SECONDS,
        MetricKind::Histogram,
        &["operation"],
        "Scraping operation duration in seconds",
    )?;
    registry.declare(
        SCRAPER_ITEMS_SCRAPED_TOTAL,
        MetricKind::Counter,
        &["item_type"],
        "Total items scraped",
    )?;
    registry.declare(
        SCRAPER_ERRORS_TOTAL,
        MetricKind::Counter,
        &["error_type"],
        "Total scraping errors by type",
    )?;
    registry.declare(
        SCRAPER_HTTP_REQUESTS_TOTAL,
        MetricKind::Counter,
        &["status_code"],
        "Total HTTP requests by response status code",
    )?;
    registry.declare(
        SCRAPER_HTTP_RESPONSE_DURATION_SECONDS,
        MetricKind::Histogram,
        &[],
        "HTTP response time in seconds",
    )?;
    registry.declare(
        SCRAPER_SYSTEM_CPU_USAGE_PERCENT,
        MetricKind::Gauge,
        &[],
        "System CPU usage percentage",
    )?;
    registry.declare(
        SCRAPER_SYSTEM_MEMORY_USAGE_BYTES,
        MetricKind::Gauge,
        &[],
        "System memory usage in bytes",
    )?;
    registry.declare(
        SCRAPER_RATE_LIMIT_DELAYS_TOTAL,
        MetricKind::Counter,
        &[],
        "Total rate limit delays applied",
    )?;
    registry.declare_histogram(
        SCRAPER_RATE_LIMIT_DELAY_SECONDS,
        &[],
        "Rate limit delay duration in seconds",
        RATE_LIMIT_BUCKETS,
    )?;
    Ok(())
}

/// Facade over the metric registry, health registry, and background sampler.
///
/// Cheap to share: clone the [`Arc`]s out of the accessors, or wrap the whole
/// context in one. Must be started from within a Tokio runtime.
pub struct MonitoringContext {
    identity: ScraperIdentity,
    registry: Arc<MetricRegistry>,
    health: Arc<HealthRegistry>,
    shutdown: CancellationToken,
    sampler: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MonitoringContext {
    /// Build the context and spawn the resource sampler.
    ///
    /// A zero `sampling_interval` disables the sampler; the CPU and memory
    /// gauges then stay at their last written value.
    pub fn start(config: MonitoringConfig) -> Result<Self> {
        let identity = config.identity();
        let registry = Arc::new(MetricRegistry::new());
        declare_builtin_catalog(&registry)?;

        let health = Arc::new(HealthRegistry::new(identity.clone(), &config));
        let shutdown = CancellationToken::new();

        let sampler = if config.sampling_interval.is_zero() {
            None
        } else {
            Some(spawn_sampler(
                Arc::clone(&registry),
                health.resources(),
                config.sampling_interval,
                shutdown.clone(),
            ))
        };

        info!(
            scraper = %identity.name,
            version = %identity.version,
            environment = %identity.environment,
            "monitoring context started"
        );

        Ok(Self {
            identity,
            registry,
            health,
            shutdown,
            sampler: Mutex::new(sampler),
            closed: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &ScraperIdentity {
        &self.identity
    }

    /// Shared handle to the metric registry, for declaring and recording
    /// scraper-specific series beyond the built-in catalog.
    pub fn registry(&self) -> Arc<MetricRegistry> {
        Arc::clone(&self.registry)
    }

    /// Shared handle to the health registry, for probe registration.
    pub fn health(&self) -> Arc<HealthRegistry> {
        Arc::clone(&self.health)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MonitoringError::ContextClosed);
        }
        Ok(())
    }

    /// Open an operation scope. The caller closes it with
    /// [`OperationScope::success`] or [`OperationScope::fail`]; dropping it
    /// unclosed records a cancelled operation.
    pub fn begin_operation(
        &self,
        operation: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<OperationScope> {
        self.ensure_open()?;
        Ok(OperationScope::open(
            Arc::clone(&self.registry),
            operation,
            target,
        ))
    }

    /// Run a closure inside an operation scope; see [`tracker::track`].
    pub fn track<T, E, F>(
        &self,
        operation: &str,
        target: &str,
        work: F,
    ) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce(&OperationScope) -> std::result::Result<T, E>,
    {
        self.ensure_open()?;
        Ok(tracker::track(&self.registry, operation, target, work))
    }

    /// Run a future inside an operation scope; see [`tracker::track_async`].
    pub async fn track_async<T, E, F, Fut>(
        &self,
        operation: &str,
        target: &str,
        work: F,
    ) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce(Arc<OperationScope>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.ensure_open()?;
        Ok(tracker::track_async(&self.registry, operation, target, work).await)
    }

    /// Record one outbound HTTP request and its response time.
    pub fn record_http_request(&self, status_code: u16, duration: Duration) -> Result<()> {
        self.ensure_open()?;
        self.registry
            .inc(SCRAPER_HTTP_REQUESTS_TOTAL, &[&status_code.to_string()])?;
        self.registry.observe(
            SCRAPER_HTTP_RESPONSE_DURATION_SECONDS,
            &[],
            duration.as_secs_f64(),
        )
    }

    /// Record one rate-limit pause and its length.
    pub fn record_rate_limit(&self, delay: Duration) -> Result<()> {
        self.ensure_open()?;
        self.registry.inc(SCRAPER_RATE_LIMIT_DELAYS_TOTAL, &[])?;
        self.registry
            .observe(SCRAPER_RATE_LIMIT_DELAY_SECONDS, &[], delay.as_secs_f64())
    }

    /// Register a custom async health probe.
    pub fn register_probe(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
        probe: ProbeFn,
    ) -> Result<()> {
        self.ensure_open()?;
        self.health.register(name, description, required, probe)
    }

    /// Register a synchronous health probe closure.
    pub fn register_probe_fn<F>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
        probe: F,
    ) -> Result<()>
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.health.register_fn(name, description, required, probe)
    }

    /// Evaluate health for the given scope.
    pub async fn evaluate_health(&self, scope: EvaluationScope) -> Result<HealthSnapshot> {
        self.ensure_open()?;
        Ok(self.health.evaluate(scope).await)
    }

    /// Point-in-time view of every metric series.
    pub fn metrics_snapshot(&self) -> Result<Vec<SeriesSnapshot>> {
        self.ensure_open()?;
        Ok(self.registry.snapshot())
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render_metrics(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(render_prometheus(&self.registry.snapshot(), &self.identity))
    }

    /// Stop the sampler, close the context, and return the final metrics
    /// snapshot so the host can do one last export. Idempotent; the second
    /// and later calls return the snapshot without any work left to stop.
    pub async fn shutdown(&self) -> Vec<SeriesSnapshot> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            let handle = self.sampler.lock().take();
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!(error = %e, "resource sampler ended abnormally");
                    }
                }
            }
            info!(scraper = %self.identity.name, "monitoring context stopped");
        }
        self.registry.snapshot()
    }
}

impl Drop for MonitoringContext {
    fn drop(&mut self) {
        // Backstop for contexts dropped without shutdown(): cancel the
        // sampler so it does not outlive the registry handles it samples into.
        if !self.closed.load(Ordering::SeqCst) {
            self.shutdown.cancel();
            debug!(scraper = %self.identity.name, "monitoring context dropped without shutdown");
        }
    }
}

fn spawn_sampler(
    registry: Arc<MetricRegistry>,
    resources: Arc<ResourceMonitor>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("resource sampler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    sample_resources(&registry, &resources);
                }
            }
        }
    })
}

fn sample_resources(registry: &MetricRegistry, resources: &ResourceMonitor) {
    let cpu = resources.cpu_percent();
    let memory = resources.memory();
    if let Err(e) = registry.set(SCRAPER_SYSTEM_CPU_USAGE_PERCENT, &[], cpu as f64) {
        warn!(error = %e, "failed to record cpu sample");
    }
    if let Err(e) = registry.set(
        SCRAPER_SYSTEM_MEMORY_USAGE_BYTES,
        &[],
        memory.used_bytes as f64,
    ) {
        warn!(error = %e, "failed to record memory sample");
    }
    debug!(
        cpu_percent = cpu,
        memory_used_bytes = memory.used_bytes,
        "resource sample"
    );
}
