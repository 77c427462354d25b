//! Lifecycle hooks for wiring the context into a host scraping framework.
//!
//! A host framework (job runner, spider engine, scheduler) calls these three
//! methods at its natural seams; implementations translate them into metric
//! and log activity. Nothing here depends on any particular framework.

use tracing::{info, warn};

use crate::context::{MonitoringContext, SCRAPER_ITEMS_SCRAPED_TOTAL};

/// Callbacks a host framework invokes around a scraping run.
///
/// All methods default to no-ops so implementors override only the seams
/// they care about.
pub trait HostLifecycle: Send + Sync {
    /// The host started a scraping run.
    fn on_start(&self, _context: &MonitoringContext) {}

    /// The host produced `count` items of `item_type`.
    fn on_item_scraped(&self, _context: &MonitoringContext, _item_type: &str, _count: u64) {}

    /// The run ended; `reason` is the host's own closing reason string.
    fn on_stop(&self, _context: &MonitoringContext, _reason: &str) {}
}

/// Default lifecycle: counts items into the built-in catalog and logs the
/// run boundaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingLifecycle;

impl HostLifecycle for LoggingLifecycle {
    fn on_start(&self, context: &MonitoringContext) {
        info!(scraper = %context.identity().name, "scraping run started");
    }

    fn on_item_scraped(&self, context: &MonitoringContext, item_type: &str, count: u64) {
        if let Err(e) =
            context
                .registry()
                .add(SCRAPER_ITEMS_SCRAPED_TOTAL, &[item_type], count as f64)
        {
            warn!(error = %e, item_type, "failed to count scraped items");
        }
    }

    fn on_stop(&self, context: &MonitoringContext, reason: &str) {
        info!(scraper = %context.identity().name, reason, "scraping run stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitoringConfig;
    use std::time::Duration;

    fn test_context() -> MonitoringContext {
        let config =
            MonitoringConfig::new("test-scraper").with_sampling_interval(Duration::ZERO);
        MonitoringContext::start(config).unwrap()
    }

    #[tokio::test]
    async fn logging_lifecycle_counts_items() {
        let context = test_context();
        let hooks = LoggingLifecycle;

        hooks.on_start(&context);
        hooks.on_item_scraped(&context, "product", 3);
        hooks.on_item_scraped(&context, "product", 2);
        hooks.on_item_scraped(&context, "review", 1);
        hooks.on_stop(&context, "finished");

        let registry = context.registry();
        assert_eq!(
            registry.counter_value(SCRAPER_ITEMS_SCRAPED_TOTAL, &["product"]),
            Some(5.0)
        );
        assert_eq!(
            registry.counter_value(SCRAPER_ITEMS_SCRAPED_TOTAL, &["review"]),
            Some(1.0)
        );
        context.shutdown().await;
    }

    #[tokio::test]
    async fn custom_lifecycle_overrides_only_what_it_needs() {
        struct CountOnly(std::sync::atomic::AtomicU64);
        impl HostLifecycle for CountOnly {
            fn on_item_scraped(&self, _: &MonitoringContext, _: &str, count: u64) {
                self.0.fetch_add(count, std::sync::atomic::Ordering::Relaxed);
            }
        }

        let context = test_context();
        let hooks = CountOnly(std::sync::atomic::AtomicU64::new(0));
        hooks.on_start(&context);
        hooks.on_item_scraped(&context, "product", 7);
        hooks.on_stop(&context, "closed");

        assert_eq!(hooks.0.load(std::sync::atomic::Ordering::Relaxed), 7);
        context.shutdown().await;
    }
}
