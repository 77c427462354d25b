//! Configuration values for the monitoring context.
//!
//! Only the values live here; sourcing them (env vars, files, CLI) is the
//! embedding application's job.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// Output format for the optional logging initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable console output.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Warn/critical ceilings for the built-in resource probes, in percent.
///
/// Exceeding a warn ceiling degrades the aggregate health status; exceeding a
/// critical ceiling makes it unhealthy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceThresholds {
    pub cpu_warn: f32,
    pub cpu_critical: f32,
    pub memory_warn: f32,
    pub memory_critical: f32,
    pub disk_warn: f32,
    pub disk_critical: f32,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_warn: 75.0,
            cpu_critical: 90.0,
            memory_warn: 75.0,
            memory_critical: 90.0,
            disk_warn: 80.0,
            disk_critical: 95.0,
        }
    }
}

/// Configuration for a monitoring context.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Scraper name, attached to every metric and health snapshot.
    pub scraper_name: String,
    /// Scraper version string.
    pub scraper_version: String,
    /// Deployment environment tag (development, staging, production, ...).
    pub environment: String,
    /// Additional constant labels attached to exported metrics.
    pub custom_labels: HashMap<String, String>,
    /// Per-probe timeout during health evaluation.
    pub probe_timeout: Duration,
    /// Interval for the background CPU/memory sampler. Zero disables it.
    pub sampling_interval: Duration,
    /// How long an aggregate health snapshot may be served from cache.
    /// Zero disables memoization.
    pub health_cache_ttl: Duration,
    /// Ceilings for the built-in resource probes.
    pub thresholds: ResourceThresholds,
    /// Format used by [`crate::logging::init_logging`].
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            scraper_name: "default_scraper".to_string(),
            scraper_version: "1.0.0".to_string(),
            environment: "development".to_string(),
            custom_labels: HashMap::new(),
            probe_timeout: Duration::from_secs(5),
            sampling_interval: Duration::from_secs(30),
            health_cache_ttl: Duration::from_secs(1),
            thresholds: ResourceThresholds::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl MonitoringConfig {
    /// Create a config for the given scraper name with defaults elsewhere.
    pub fn new(scraper_name: impl Into<String>) -> Self {
        Self {
            scraper_name: scraper_name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.scraper_version = version.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_labels.insert(key.into(), value.into());
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    pub fn with_health_cache_ttl(mut self, ttl: Duration) -> Self {
        self.health_cache_ttl = ttl;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ResourceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Derive the immutable identity attached to everything this context emits.
    pub fn identity(&self) -> ScraperIdentity {
        ScraperIdentity {
            name: self.scraper_name.clone(),
            version: self.scraper_version.clone(),
            environment: self.environment.clone(),
            custom_labels: self.custom_labels.clone(),
        }
    }
}

/// Immutable identity of the host scraper.
///
/// Attached as constant labels to every exported metric and to health
/// snapshots. Created once at context construction, never mutated.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScraperIdentity {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub custom_labels: HashMap<String, String>,
}

impl ScraperIdentity {
    /// Constant label pairs in stable order: the well-known identity labels
    /// first, then custom labels sorted by key.
    pub fn base_labels(&self) -> Vec<(String, String)> {
        let mut labels = vec![
            ("scraper_name".to_string(), self.name.clone()),
            ("scraper_version".to_string(), self.version.clone()),
            ("environment".to_string(), self.environment.clone()),
        ];
        let mut custom: Vec<_> = self
            .custom_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        custom.sort();
        labels.extend(custom);
        labels
    }
}
