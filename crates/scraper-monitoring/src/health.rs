//! Health check registry: named probes, resource monitoring, and snapshots.
//!
//! Built-in probes (process liveness, CPU, memory, disk) are registered at
//! construction; custom probes are registered by the embedding application,
//! usually at startup. Every evaluation runs the probes relevant to the
//! requested scope fresh, bounds each probe with a timeout, and folds probe
//! failures into the snapshot instead of propagating them. The aggregate
//! snapshot is memoized briefly so a burst of HTTP health requests does not
//! re-run expensive probes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::debug;

use crate::config::{MonitoringConfig, ResourceThresholds, ScraperIdentity};
use crate::error::{MonitoringError, Result};

/// Names reserved for the built-in probes.
const BUILTIN_PROBE_NAMES: &[&str] = &["process", "cpu_usage", "memory_usage", "disk_space"];

/// Aggregate health of the scraper process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    /// HTTP status an external layer should answer with: degraded still
    /// serves traffic, unhealthy does not.
    pub fn http_status(&self) -> u16 {
        match self {
            HealthState::Healthy | HealthState::Degraded => 200,
            HealthState::Unhealthy => 503,
        }
    }

    /// Downgrade `self` to at least `other` (healthy < degraded < unhealthy).
    fn worsen(self, other: HealthState) -> HealthState {
        use HealthState::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of one probe invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Pass,
    /// A warn threshold was exceeded; degrades the aggregate status.
    Warn,
    Fail,
}

/// Classification of a probe's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Trivial process-alive probe.
    Liveness,
    /// Built-in CPU/memory/disk probe.
    Resource,
    /// User-registered probe.
    Custom,
}

/// Which probes an evaluation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationScope {
    /// Process-alive probes only (`/live`).
    Liveness,
    /// Liveness plus built-in resource probes (`/ready`).
    Readiness,
    /// Everything, including custom probes (`/health`).
    Full,
}

impl EvaluationScope {
    fn cache_slot(self) -> usize {
        match self {
            EvaluationScope::Liveness => 0,
            EvaluationScope::Readiness => 1,
            EvaluationScope::Full => 2,
        }
    }
}

/// An async probe body. Custom probes may perform I/O; each invocation is
/// bounded by the registry's per-probe timeout.
pub type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

struct CustomProbe {
    name: String,
    description: String,
    required: bool,
    probe: ProbeFn,
}

/// Outcome of one probe during one evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub name: String,
    pub kind: ProbeKind,
    pub status: ProbeStatus,
    pub required: bool,
    pub description: String,
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Immutable result of one evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthState,
    /// RFC 3339 timestamp of the evaluation.
    pub timestamp: String,
    pub scraper: String,
    pub version: String,
    pub environment: String,
    pub probes: Vec<ProbeReport>,
}

impl HealthSnapshot {
    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }
}

/// Current memory usage as reported by the OS.
#[derive(Debug, Clone, Copy)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f32,
}

/// Samples process/system resources through sysinfo.
///
/// Shared between the health registry's built-in probes and the monitoring
/// context's background gauge sampler.
pub struct ResourceMonitor {
    system: Mutex<System>,
    disks: Mutex<Disks>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }

    /// Global CPU usage, 0-100.
    pub fn cpu_percent(&self) -> f32 {
        let mut system = self.system.lock();
        system.refresh_cpu_all();
        system.global_cpu_usage()
    }

    /// Used/total memory and the used percentage.
    pub fn memory(&self) -> MemoryUsage {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        let used = system.used_memory();
        let percent = if total > 0 {
            (used as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };
        MemoryUsage {
            used_bytes: used,
            total_bytes: total,
            percent,
        }
    }

    /// Highest used-space percentage across mounted disks, if any are visible.
    pub fn max_disk_percent(&self) -> Option<f32> {
        let mut disks = self.disks.lock();
        disks.refresh(true);
        disks
            .list()
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space() - d.available_space();
                (used as f64 / d.total_space() as f64 * 100.0) as f32
            })
            .max_by(|a, b| a.total_cmp(b))
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the probe list and computes health snapshots.
pub struct HealthRegistry {
    identity: ScraperIdentity,
    thresholds: ResourceThresholds,
    probe_timeout: Duration,
    cache_ttl: Duration,
    started_at: Instant,
    resources: Arc<ResourceMonitor>,
    /// Custom probes. Cloned out before evaluation so the lock never spans
    /// an await; writes are rare (registration at startup).
    custom: RwLock<Vec<Arc<CustomProbe>>>,
    /// Memoized snapshot per scope.
    cache: Mutex<[Option<(Instant, HealthSnapshot)>; 3]>,
}

impl HealthRegistry {
    pub fn new(identity: ScraperIdentity, config: &MonitoringConfig) -> Self {
        Self {
            identity,
            thresholds: config.thresholds,
            probe_timeout: config.probe_timeout,
            cache_ttl: config.health_cache_ttl,
            started_at: Instant::now(),
            resources: Arc::new(ResourceMonitor::new()),
            custom: RwLock::new(Vec::new()),
            cache: Mutex::new([None, None, None]),
        }
    }

    /// Shared handle to the resource monitor.
    pub fn resources(&self) -> Arc<ResourceMonitor> {
        Arc::clone(&self.resources)
    }

    /// Register a custom async probe.
    ///
    /// `required` decides whether a failure makes the aggregate unhealthy
    /// (required) or merely degraded (advisory).
    pub fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
        probe: ProbeFn,
    ) -> Result<()> {
        let name = name.into();
        let mut custom = self.custom.write();
        if BUILTIN_PROBE_NAMES.contains(&name.as_str())
            || custom.iter().any(|p| p.name == name)
        {
            return Err(MonitoringError::DuplicateProbeName(name));
        }
        debug!(probe = %name, required, "health probe registered");
        custom.push(Arc::new(CustomProbe {
            name,
            description: description.into(),
            required,
            probe,
        }));
        Ok(())
    }

    /// Register a synchronous probe closure.
    pub fn register_fn<F>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
        probe: F,
    ) -> Result<()>
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let probe: ProbeFn = Arc::new(move || {
            let result = probe();
            Box::pin(std::future::ready(result))
        });
        self.register(name, description, required, probe)
    }

    /// Remove a custom probe. Built-in probes cannot be removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut custom = self.custom.write();
        let before = custom.len();
        custom.retain(|p| p.name != name);
        custom.len() != before
    }

    /// Run the probes for `scope` and aggregate the result.
    ///
    /// Serves a memoized snapshot when one newer than the cache TTL exists.
    /// Probe failures and timeouts become failed probe reports; they never
    /// propagate out of this method.
    pub async fn evaluate(&self, scope: EvaluationScope) -> HealthSnapshot {
        if !self.cache_ttl.is_zero() {
            let cache = self.cache.lock();
            if let Some((at, snapshot)) = &cache[scope.cache_slot()] {
                if at.elapsed() < self.cache_ttl {
                    return snapshot.clone();
                }
            }
        }

        let mut probes = vec![self.probe_process()];

        if matches!(scope, EvaluationScope::Readiness | EvaluationScope::Full) {
            probes.push(self.probe_cpu());
            probes.push(self.probe_memory());
            probes.push(self.probe_disk());
        }

        if scope == EvaluationScope::Full {
            let custom: Vec<Arc<CustomProbe>> = self.custom.read().clone();
            for probe in custom {
                probes.push(self.run_custom_probe(&probe).await);
            }
        }

        let mut status = HealthState::Healthy;
        for report in &probes {
            match report.status {
                ProbeStatus::Fail if report.required => {
                    status = status.worsen(HealthState::Unhealthy);
                }
                ProbeStatus::Fail | ProbeStatus::Warn => {
                    status = status.worsen(HealthState::Degraded);
                }
                ProbeStatus::Pass => {}
            }
        }

        let snapshot = HealthSnapshot {
            status,
            timestamp: Utc::now().to_rfc3339(),
            scraper: self.identity.name.clone(),
            version: self.identity.version.clone(),
            environment: self.identity.environment.clone(),
            probes,
        };

        if !self.cache_ttl.is_zero() {
            self.cache.lock()[scope.cache_slot()] = Some((Instant::now(), snapshot.clone()));
        }
        snapshot
    }

    async fn run_custom_probe(&self, probe: &CustomProbe) -> ProbeReport {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, (probe.probe)()).await;
        let (status, message) = match outcome {
            Ok(Ok(true)) => (ProbeStatus::Pass, None),
            Ok(Ok(false)) => (
                ProbeStatus::Fail,
                Some(
                    MonitoringError::ProbeFailure {
                        name: probe.name.clone(),
                        message: "probe returned false".to_string(),
                    }
                    .to_string(),
                ),
            ),
            Ok(Err(e)) => (
                ProbeStatus::Fail,
                Some(
                    MonitoringError::ProbeFailure {
                        name: probe.name.clone(),
                        message: e.to_string(),
                    }
                    .to_string(),
                ),
            ),
            Err(_) => (
                ProbeStatus::Fail,
                Some(
                    MonitoringError::ProbeTimeout {
                        name: probe.name.clone(),
                        timeout_ms: self.probe_timeout.as_millis() as u64,
                    }
                    .to_string(),
                ),
            ),
        };

        ProbeReport {
            name: probe.name.clone(),
            kind: ProbeKind::Custom,
            status,
            required: probe.required,
            description: probe.description.clone(),
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn probe_process(&self) -> ProbeReport {
        ProbeReport {
            name: "process".to_string(),
            kind: ProbeKind::Liveness,
            status: ProbeStatus::Pass,
            required: true,
            description: "Process is alive".to_string(),
            message: Some(format!("up {}s", self.started_at.elapsed().as_secs())),
            duration_ms: 0,
        }
    }

    fn probe_cpu(&self) -> ProbeReport {
        let start = Instant::now();
        let cpu = self.resources.cpu_percent();
        self.resource_report(
            "cpu_usage",
            "System CPU usage below configured ceilings",
            cpu,
            self.thresholds.cpu_warn,
            self.thresholds.cpu_critical,
            start,
        )
    }

    fn probe_memory(&self) -> ProbeReport {
        let start = Instant::now();
        let memory = self.resources.memory();
        self.resource_report(
            "memory_usage",
            "System memory usage below configured ceilings",
            memory.percent,
            self.thresholds.memory_warn,
            self.thresholds.memory_critical,
            start,
        )
    }

    fn probe_disk(&self) -> ProbeReport {
        let start = Instant::now();
        // No visible disks (containers, stripped-down images) counts as OK.
        let disk = self.resources.max_disk_percent().unwrap_or(0.0);
        self.resource_report(
            "disk_space",
            "Disk usage below configured ceilings",
            disk,
            self.thresholds.disk_warn,
            self.thresholds.disk_critical,
            start,
        )
    }

    fn resource_report(
        &self,
        name: &str,
        description: &str,
        value: f32,
        warn: f32,
        critical: f32,
        start: Instant,
    ) -> ProbeReport {
        let (status, message) = if value >= critical {
            (
                ProbeStatus::Fail,
                Some(format!("{value:.1}% exceeds critical threshold {critical:.1}%")),
            )
        } else if value >= warn {
            (
                ProbeStatus::Warn,
                Some(format!("{value:.1}% exceeds warn threshold {warn:.1}%")),
            )
        } else {
            (ProbeStatus::Pass, Some(format!("{value:.1}%")))
        };

        ProbeReport {
            name: name.to_string(),
            kind: ProbeKind::Resource,
            status,
            required: true,
            description: description.to_string(),
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Thresholds no real machine can exceed, so resource probes always pass.
    fn lenient_thresholds() -> ResourceThresholds {
        ResourceThresholds {
            cpu_warn: 101.0,
            cpu_critical: 102.0,
            memory_warn: 101.0,
            memory_critical: 102.0,
            disk_warn: 101.0,
            disk_critical: 102.0,
        }
    }

    fn test_registry() -> HealthRegistry {
        let config = MonitoringConfig::new("test-scraper")
            .with_thresholds(lenient_thresholds())
            .with_probe_timeout(Duration::from_millis(100))
            .with_health_cache_ttl(Duration::ZERO);
        HealthRegistry::new(config.identity(), &config)
    }

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let registry = test_registry();
        let snapshot = registry.evaluate(EvaluationScope::Full).await;
        assert_eq!(snapshot.status, HealthState::Healthy);
        assert_eq!(snapshot.http_status(), 200);
    }

    #[tokio::test]
    async fn liveness_runs_only_the_process_probe() {
        let registry = test_registry();
        registry
            .register_fn("db", "Database reachable", true, || Ok(false))
            .unwrap();

        let snapshot = registry.evaluate(EvaluationScope::Liveness).await;
        assert_eq!(snapshot.status, HealthState::Healthy);
        assert_eq!(snapshot.probes.len(), 1);
        assert_eq!(snapshot.probes[0].name, "process");
    }

    #[tokio::test]
    async fn readiness_includes_resource_probes() {
        let registry = test_registry();
        registry
            .register_fn("db", "Database reachable", true, || Ok(false))
            .unwrap();

        let snapshot = registry.evaluate(EvaluationScope::Readiness).await;
        let names: Vec<&str> = snapshot.probes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["process", "cpu_usage", "memory_usage", "disk_space"]);
        // Custom probe excluded, so readiness stays healthy.
        assert_eq!(snapshot.status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn required_probe_failure_is_unhealthy() {
        let registry = test_registry();
        registry
            .register_fn("db", "Database reachable", true, || Ok(false))
            .unwrap();

        let snapshot = registry.evaluate(EvaluationScope::Full).await;
        assert_eq!(snapshot.status, HealthState::Unhealthy);
        assert_eq!(snapshot.http_status(), 503);

        let db = snapshot.probes.iter().find(|p| p.name == "db").unwrap();
        assert_eq!(db.status, ProbeStatus::Fail);
        assert!(db.message.as_deref().unwrap().contains("returned false"));
    }

    #[tokio::test]
    async fn advisory_probe_failure_is_degraded() {
        let registry = test_registry();
        registry
            .register_fn("cache", "Cache reachable", false, || Ok(false))
            .unwrap();

        let snapshot = registry.evaluate(EvaluationScope::Full).await;
        assert_eq!(snapshot.status, HealthState::Degraded);
        assert_eq!(snapshot.http_status(), 200);
    }

    #[tokio::test]
    async fn erroring_probe_does_not_mask_others() {
        let registry = test_registry();
        registry
            .register_fn("broken", "Always errors", false, || {
                Err(anyhow::anyhow!("connection refused"))
            })
            .unwrap();
        registry
            .register_fn("fine", "Always passes", true, || Ok(true))
            .unwrap();

        let snapshot = registry.evaluate(EvaluationScope::Full).await;

        let broken = snapshot.probes.iter().find(|p| p.name == "broken").unwrap();
        assert_eq!(broken.status, ProbeStatus::Fail);
        assert!(broken.message.as_deref().unwrap().contains("connection refused"));

        let fine = snapshot.probes.iter().find(|p| p.name == "fine").unwrap();
        assert_eq!(fine.status, ProbeStatus::Pass);

        // Advisory failure only: degraded, not unhealthy.
        assert_eq!(snapshot.status, HealthState::Degraded);
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        let registry = test_registry();
        let probe: ProbeFn = Arc::new(|| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(true)
            })
        });
        registry
            .register("slow", "Sleeps past the timeout", true, probe)
            .unwrap();

        let snapshot = registry.evaluate(EvaluationScope::Full).await;
        let slow = snapshot.probes.iter().find(|p| p.name == "slow").unwrap();
        assert_eq!(slow.status, ProbeStatus::Fail);
        assert!(slow.message.as_deref().unwrap().contains("timed out"));
        assert_eq!(snapshot.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn duplicate_probe_name_rejected() {
        let registry = test_registry();
        registry.register_fn("db", "first", true, || Ok(true)).unwrap();

        let err = registry
            .register_fn("db", "second", true, || Ok(true))
            .unwrap_err();
        assert!(matches!(err, MonitoringError::DuplicateProbeName(_)));

        // Built-in names are reserved too.
        let err = registry
            .register_fn("cpu_usage", "shadow", true, || Ok(true))
            .unwrap_err();
        assert!(matches!(err, MonitoringError::DuplicateProbeName(_)));
    }

    #[tokio::test]
    async fn unregister_removes_only_custom_probes() {
        let registry = test_registry();
        registry.register_fn("db", "d", true, || Ok(true)).unwrap();

        assert!(registry.unregister("db"));
        assert!(!registry.unregister("db"));
        assert!(!registry.unregister("cpu_usage"));

        let snapshot = registry.evaluate(EvaluationScope::Full).await;
        assert!(snapshot.probes.iter().all(|p| p.name != "db"));
    }

    #[tokio::test]
    async fn snapshot_is_memoized_within_ttl() {
        let config = MonitoringConfig::new("test-scraper")
            .with_thresholds(lenient_thresholds())
            .with_health_cache_ttl(Duration::from_secs(30));
        let registry = HealthRegistry::new(config.identity(), &config);

        let first = registry.evaluate(EvaluationScope::Full).await;
        registry.register_fn("late", "l", true, || Ok(true)).unwrap();
        let second = registry.evaluate(EvaluationScope::Full).await;

        // Cached result predates the new probe.
        assert_eq!(first.probes.len(), second.probes.len());
        assert!(second.probes.iter().all(|p| p.name != "late"));
    }

    #[test]
    fn resource_monitor_samples_real_values() {
        let monitor = ResourceMonitor::new();
        let memory = monitor.memory();
        assert!(memory.total_bytes > 0);
        assert!(memory.percent >= 0.0 && memory.percent <= 100.0);
        // Machines without visible disks report None; otherwise a percentage.
        if let Some(disk) = monitor.max_disk_percent() {
            assert!((0.0..=100.0).contains(&disk));
        }
    }

    #[test]
    fn worsen_is_monotonic() {
        use HealthState::*;
        assert_eq!(Healthy.worsen(Degraded), Degraded);
        assert_eq!(Degraded.worsen(Healthy), Degraded);
        assert_eq!(Degraded.worsen(Unhealthy), Unhealthy);
        assert_eq!(Unhealthy.worsen(Healthy), Unhealthy);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let report = ProbeReport {
            name: "db".to_string(),
            kind: ProbeKind::Custom,
            status: ProbeStatus::Fail,
            required: true,
            description: "Database reachable".to_string(),
            message: Some("connection refused".to_string()),
            duration_ms: 12,
        };
        let snapshot = HealthSnapshot {
            status: HealthState::Unhealthy,
            timestamp: Utc::now().to_rfc3339(),
            scraper: "test".to_string(),
            version: "1.0.0".to_string(),
            environment: "development".to_string(),
            probes: vec![report],
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"status\":\"unhealthy\""));
        assert!(json.contains("\"name\":\"db\""));
        assert!(json.contains("\"duration_ms\":12"));
    }
}
