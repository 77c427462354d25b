//! Operation tracking: scoped accounting for units of scraping work.
//!
//! An [`OperationScope`] measures one operation from open to close and turns
//! the outcome into metric updates. Whatever way the scope terminates
//! (explicit success/failure, panic unwind, or a cancelled future dropping
//! the guard) it emits exactly one `scraper_requests_total` increment and one
//! `scraper_duration_seconds` observation. Items recorded during the scope
//! are folded into `scraper_items_scraped_total` immediately, so partial
//! progress survives a later failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::context::{
    SCRAPER_DURATION_SECONDS, SCRAPER_ERRORS_TOTAL, SCRAPER_ITEMS_SCRAPED_TOTAL,
    SCRAPER_REQUESTS_TOTAL,
};
use crate::registry::MetricRegistry;

/// How an operation terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    Error,
    /// The surrounding execution context was cancelled before completion.
    Cancelled,
}

impl OperationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Error => "error",
            OperationOutcome::Cancelled => "cancelled",
        }
    }
}

/// A single in-flight operation.
///
/// Open the scope, do the work, then finish with [`success`](Self::success)
/// or [`fail`](Self::fail). A scope dropped without an explicit finish closes
/// as `cancelled` (or as `error` when the thread is unwinding from a panic),
/// so no termination path can leak an open scope.
pub struct OperationScope {
    registry: Arc<MetricRegistry>,
    operation: String,
    target: String,
    span: Span,
    started: Instant,
    /// Explicit error marker; authoritative over a clean return.
    error_type: Mutex<Option<String>>,
    finished: AtomicBool,
}

impl OperationScope {
    pub(crate) fn open(
        registry: Arc<MetricRegistry>,
        operation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        let target = target.into();
        let span = info_span!("operation", operation = %operation, target = %target);
        span.in_scope(|| info!("operation started"));

        Self {
            registry,
            operation,
            target,
            span,
            started: Instant::now(),
            error_type: Mutex::new(None),
            finished: AtomicBool::new(false),
        }
    }

    /// The span bound with this operation's labels; log through it to keep
    /// log lines correlated with the operation.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Record scraped items. Applied immediately, not deferred to close.
    pub fn record_items(&self, item_type: &str, count: u64) {
        if let Err(e) = self
            .registry
            .add(SCRAPER_ITEMS_SCRAPED_TOTAL, &[item_type], count as f64)
        {
            warn!(error = %e, "failed to record scraped items");
            return;
        }
        self.span
            .in_scope(|| debug!(item_type, count, "items scraped"));
    }

    /// Flag the operation as failed without propagating an error value.
    /// Authoritative: a later clean `success()` still closes as an error.
    pub fn mark_error(&self, error_type: impl Into<String>) {
        let mut marker = self.error_type.lock();
        if marker.is_none() {
            *marker = Some(error_type.into());
        }
    }

    /// Close the scope as successful, unless an error marker was set.
    pub fn success(&self) {
        if self.error_type.lock().is_some() {
            self.close(OperationOutcome::Error);
        } else {
            self.close(OperationOutcome::Success);
        }
    }

    /// Close the scope as failed. An earlier [`mark_error`](Self::mark_error)
    /// classification wins over `error_type`.
    pub fn fail(&self, error_type: impl Into<String>) {
        self.mark_error(error_type);
        self.close(OperationOutcome::Error);
    }

    fn close(&self, outcome: OperationOutcome) {
        // Exactly-once: the first close wins, later paths (including Drop)
        // are no-ops.
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        let duration = self.started.elapsed().as_secs_f64();
        let status = outcome.as_str();

        if let Err(e) = self
            .registry
            .inc(SCRAPER_REQUESTS_TOTAL, &[&self.operation, status])
        {
            warn!(error = %e, "failed to record operation completion");
        }
        if let Err(e) = self
            .registry
            .observe(SCRAPER_DURATION_SECONDS, &[&self.operation], duration)
        {
            warn!(error = %e, "failed to record operation duration");
        }

        if outcome == OperationOutcome::Error {
            let error_type = self
                .error_type
                .lock()
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            if let Err(e) = self.registry.inc(SCRAPER_ERRORS_TOTAL, &[&error_type]) {
                warn!(error = %e, "failed to record operation error");
            }
            self.span.in_scope(|| {
                info!(status, error_type = %error_type, duration_seconds = duration, "operation closed")
            });
        } else {
            self.span
                .in_scope(|| info!(status, duration_seconds = duration, "operation closed"));
        }
    }
}

impl std::fmt::Debug for OperationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationScope")
            .field("operation", &self.operation)
            .field("target", &self.target)
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        if std::thread::panicking() {
            self.mark_error("panic");
            self.close(OperationOutcome::Error);
        } else {
            self.close(OperationOutcome::Cancelled);
        }
    }
}

/// Run a unit of work inside an operation scope.
///
/// The closure's `Result` drives the outcome: `Ok` closes the scope as
/// successful (unless it marked an error explicitly), `Err` closes it as
/// failed with the error classified by its type name, and the error is
/// returned unchanged.
pub fn track<T, E, F>(
    registry: &Arc<MetricRegistry>,
    operation: &str,
    target: &str,
    work: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&OperationScope) -> std::result::Result<T, E>,
{
    let scope = OperationScope::open(Arc::clone(registry), operation, target);
    let result = scope.span.clone().in_scope(|| work(&scope));
    match &result {
        Ok(_) => scope.success(),
        Err(_) => scope.fail(error_class::<E>()),
    }
    result
}

/// Async counterpart of [`track`].
///
/// The scope is shared with the work through an [`Arc`], so dropping the
/// returned future mid-flight (host cancellation) drops the scope and closes
/// it as `cancelled`.
pub async fn track_async<T, E, F, Fut>(
    registry: &Arc<MetricRegistry>,
    operation: &str,
    target: &str,
    work: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(Arc<OperationScope>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let scope = Arc::new(OperationScope::open(Arc::clone(registry), operation, target));
    let span = scope.span.clone();
    let result = work(Arc::clone(&scope)).instrument(span).await;
    match &result {
        Ok(_) => scope.success(),
        Err(_) => scope.fail(error_class::<E>()),
    }
    result
}

/// Classify an error by the last segment of its type name
/// (`std::io::Error` -> `Error`, a crate's `TimeoutError` -> `TimeoutError`).
pub(crate) fn error_class<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    // Strip generic arguments before taking the last path segment.
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
