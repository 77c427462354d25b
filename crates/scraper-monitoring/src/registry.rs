//! Metric registry: declared series, labeled cells, and snapshots.
//!
//! Series are declared once with a fixed kind and label schema; every
//! observation must match that schema exactly, so cardinality drift fails
//! loudly at the call site instead of corrupting aggregation. Cells are
//! sharded in a [`DashMap`] keyed by label values and each cell holds its own
//! mutex, so concurrent observers on unrelated cells never serialize and
//! `snapshot` never takes a registry-wide lock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{MonitoringError, Result};

/// Default histogram boundaries in seconds (Prometheus convention).
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// The three supported series kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

/// One aggregation cell. Counters and gauges are a single value; histograms
/// keep per-bucket counts plus the running sum/count pair.
enum Cell {
    Counter(Mutex<f64>),
    Gauge(Mutex<f64>),
    Histogram(Mutex<HistogramCell>),
}

struct HistogramCell {
    /// One slot per declared boundary plus a trailing overflow slot.
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// A declared series: schema plus its live cells.
struct Series {
    kind: MetricKind,
    label_names: Vec<String>,
    help: String,
    /// Bucket boundaries, histograms only.
    buckets: Option<Arc<Vec<f64>>>,
    /// label values -> cell.
    cells: DashMap<Vec<String>, Cell>,
}

impl Series {
    fn schema_desc(&self) -> String {
        format!("{}[{}]", self.kind, self.label_names.join(", "))
    }

    fn new_cell(&self) -> Cell {
        match self.kind {
            MetricKind::Counter => Cell::Counter(Mutex::new(0.0)),
            MetricKind::Gauge => Cell::Gauge(Mutex::new(0.0)),
            MetricKind::Histogram => {
                let boundaries = self.buckets.as_ref().expect("histogram series has buckets");
                Cell::Histogram(Mutex::new(HistogramCell {
                    counts: vec![0; boundaries.len() + 1],
                    sum: 0.0,
                    count: 0,
                }))
            }
        }
    }
}

/// Owns all declared series and their current aggregate state.
///
/// Fully synchronous: safe to call from worker threads and async tasks alike.
pub struct MetricRegistry {
    series: DashMap<String, Arc<Series>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
        }
    }

    /// Register a series. Idempotent when re-declared with an identical
    /// schema; fails with [`MonitoringError::SchemaConflict`] otherwise.
    ///
    /// Histograms declared through this method use [`DEFAULT_BUCKETS`]; use
    /// [`declare_histogram`](Self::declare_histogram) for custom boundaries.
    pub fn declare(
        &self,
        name: &str,
        kind: MetricKind,
        label_names: &[&str],
        help: &str,
    ) -> Result<()> {
        let buckets = match kind {
            MetricKind::Histogram => Some(DEFAULT_BUCKETS.to_vec()),
            _ => None,
        };
        self.declare_inner(name, kind, label_names, help, buckets)
    }

    /// Register a histogram series with explicit bucket boundaries.
    pub fn declare_histogram(
        &self,
        name: &str,
        label_names: &[&str],
        help: &str,
        buckets: &[f64],
    ) -> Result<()> {
        self.declare_inner(
            name,
            MetricKind::Histogram,
            label_names,
            help,
            Some(buckets.to_vec()),
        )
    }

    fn declare_inner(
        &self,
        name: &str,
        kind: MetricKind,
        label_names: &[&str],
        help: &str,
        buckets: Option<Vec<f64>>,
    ) -> Result<()> {
        let buckets = buckets.map(|mut b| {
            b.retain(|v| v.is_finite());
            b.sort_by(|a, b| a.partial_cmp(b).expect("finite boundaries"));
            b.dedup();
            Arc::new(b)
        });

        if let Some(existing) = self.series.get(name) {
            let same_buckets = match (&existing.buckets, &buckets) {
                (Some(a), Some(b)) => a.as_slice() == b.as_slice(),
                (None, None) => true,
                _ => false,
            };
            if existing.kind == kind
                && existing.label_names == label_names
                && same_buckets
            {
                return Ok(());
            }
            return Err(MonitoringError::SchemaConflict {
                series: name.to_string(),
                existing: existing.schema_desc(),
                requested: format!("{}[{}]", kind, label_names.join(", ")),
            });
        }

        self.series.insert(
            name.to_string(),
            Arc::new(Series {
                kind,
                label_names: label_names.iter().map(|s| s.to_string()).collect(),
                help: help.to_string(),
                buckets,
                cells: DashMap::new(),
            }),
        );
        Ok(())
    }

    /// Apply one sample to a declared series.
    ///
    /// Counters add `value` (must be >= 0), gauges replace their value, and
    /// histograms bucket `value` and update the sum/count pair.
    pub fn observe(&self, name: &str, label_values: &[&str], value: f64) -> Result<()> {
        let series = self
            .series
            .get(name)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| MonitoringError::UnknownSeries(name.to_string()))?;

        if label_values.len() != series.label_names.len() {
            return Err(MonitoringError::LabelArityMismatch {
                series: name.to_string(),
                expected: series.label_names.len(),
                got: label_values.len(),
            });
        }
        if !value.is_finite() {
            return Err(MonitoringError::invalid_sample(name, "value is not finite"));
        }
        if series.kind == MetricKind::Counter && value < 0.0 {
            return Err(MonitoringError::invalid_sample(
                name,
                format!("counter increment must be >= 0, got {value}"),
            ));
        }

        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        let cell = series.cells.entry(key).or_insert_with(|| series.new_cell());

        match &*cell {
            Cell::Counter(total) => *total.lock() += value,
            Cell::Gauge(current) => *current.lock() = value,
            Cell::Histogram(hist) => {
                let boundaries = series.buckets.as_ref().expect("histogram series has buckets");
                let mut hist = hist.lock();
                let slot = boundaries
                    .iter()
                    .position(|b| value <= *b)
                    .unwrap_or(boundaries.len());
                hist.counts[slot] += 1;
                hist.sum += value;
                hist.count += 1;
            }
        }
        Ok(())
    }

    /// Increment a counter cell by one.
    pub fn inc(&self, name: &str, label_values: &[&str]) -> Result<()> {
        self.observe(name, label_values, 1.0)
    }

    /// Add to a counter cell.
    pub fn add(&self, name: &str, label_values: &[&str], value: f64) -> Result<()> {
        self.observe(name, label_values, value)
    }

    /// Set a gauge cell.
    pub fn set(&self, name: &str, label_values: &[&str], value: f64) -> Result<()> {
        self.observe(name, label_values, value)
    }

    /// Current value of a counter cell, if it has been touched.
    pub fn counter_value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let series = self.series.get(name)?;
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        let cell = series.cells.get(&key)?;
        match &*cell {
            Cell::Counter(total) => Some(*total.lock()),
            _ => None,
        }
    }

    /// Current value of a gauge cell, if it has been touched.
    pub fn gauge_value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let series = self.series.get(name)?;
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        let cell = series.cells.get(&key)?;
        match &*cell {
            Cell::Gauge(current) => Some(*current.lock()),
            _ => None,
        }
    }

    /// Point-in-time view of every series and cell.
    ///
    /// Consistent per cell (each cell is read under its own lock), not atomic
    /// across series. Sorted by series name and label values so output is
    /// deterministic.
    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        let mut out: Vec<SeriesSnapshot> = self
            .series
            .iter()
            .map(|entry| {
                let series = entry.value();
                let mut samples: Vec<SampleSnapshot> = series
                    .cells
                    .iter()
                    .map(|cell_entry| {
                        let value = match cell_entry.value() {
                            Cell::Counter(total) => AggregateValue::Counter(*total.lock()),
                            Cell::Gauge(current) => AggregateValue::Gauge(*current.lock()),
                            Cell::Histogram(hist) => {
                                let boundaries =
                                    series.buckets.as_ref().expect("histogram series has buckets");
                                let hist = hist.lock();
                                let mut cumulative = 0u64;
                                let buckets = boundaries
                                    .iter()
                                    .zip(&hist.counts)
                                    .map(|(le, count)| {
                                        cumulative += count;
                                        BucketCount {
                                            le: *le,
                                            cumulative,
                                        }
                                    })
                                    .collect();
                                AggregateValue::Histogram(HistogramSnapshot {
                                    buckets,
                                    sum: hist.sum,
                                    count: hist.count,
                                })
                            }
                        };
                        SampleSnapshot {
                            label_values: cell_entry.key().clone(),
                            value,
                        }
                    })
                    .collect();
                samples.sort_by(|a, b| a.label_values.cmp(&b.label_values));

                SeriesSnapshot {
                    name: entry.key().clone(),
                    kind: series.kind,
                    help: series.help.clone(),
                    label_names: series.label_names.clone(),
                    samples,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one series: schema plus every live cell.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub help: String,
    pub label_names: Vec<String>,
    pub samples: Vec<SampleSnapshot>,
}

/// Snapshot of one (series, label values) cell.
#[derive(Debug, Clone, Serialize)]
pub struct SampleSnapshot {
    pub label_values: Vec<String>,
    pub value: AggregateValue,
}

/// Aggregate state of a cell at snapshot time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateValue {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramSnapshot),
}

/// Cumulative bucket counts plus sum/count for one histogram cell.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<BucketCount>,
    pub sum: f64,
    pub count: u64,
}

/// Cumulative count of observations `<= le`.
#[derive(Debug, Clone, Serialize)]
pub struct BucketCount {
    pub le: f64,
    pub cumulative: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_counter() -> MetricRegistry {
        let registry = MetricRegistry::new();
        registry
            .declare(
                "requests_total",
                MetricKind::Counter,
                &["operation", "status"],
                "Total requests",
            )
            .unwrap();
        registry
    }

    #[test]
    fn declare_identical_is_idempotent() {
        let registry = registry_with_counter();
        registry
            .declare(
                "requests_total",
                MetricKind::Counter,
                &["operation", "status"],
                "Total requests",
            )
            .unwrap();
    }

    #[test]
    fn declare_different_kind_conflicts() {
        let registry = registry_with_counter();
        let err = registry
            .declare(
                "requests_total",
                MetricKind::Gauge,
                &["operation", "status"],
                "Total requests",
            )
            .unwrap_err();
        assert!(matches!(err, MonitoringError::SchemaConflict { .. }));
    }

    #[test]
    fn declare_different_labels_conflicts() {
        let registry = registry_with_counter();
        let err = registry
            .declare(
                "requests_total",
                MetricKind::Counter,
                &["operation"],
                "Total requests",
            )
            .unwrap_err();
        assert!(matches!(err, MonitoringError::SchemaConflict { .. }));
    }

    #[test]
    fn observe_unknown_series() {
        let registry = MetricRegistry::new();
        let err = registry.observe("nope", &[], 1.0).unwrap_err();
        assert!(matches!(err, MonitoringError::UnknownSeries(_)));
    }

    #[test]
    fn observe_wrong_arity() {
        let registry = registry_with_counter();
        let err = registry.observe("requests_total", &["fetch"], 1.0).unwrap_err();
        assert!(matches!(
            err,
            MonitoringError::LabelArityMismatch {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn counter_accumulates() {
        let registry = registry_with_counter();
        registry
            .observe("requests_total", &["fetch", "success"], 2.0)
            .unwrap();
        registry.inc("requests_total", &["fetch", "success"]).unwrap();
        registry.inc("requests_total", &["fetch", "error"]).unwrap();

        assert_eq!(
            registry.counter_value("requests_total", &["fetch", "success"]),
            Some(3.0)
        );
        assert_eq!(
            registry.counter_value("requests_total", &["fetch", "error"]),
            Some(1.0)
        );
    }

    #[test]
    fn counter_rejects_negative() {
        let registry = registry_with_counter();
        let err = registry
            .observe("requests_total", &["fetch", "success"], -1.0)
            .unwrap_err();
        assert!(matches!(err, MonitoringError::InvalidSample { .. }));
    }

    #[test]
    fn gauge_replaces() {
        let registry = MetricRegistry::new();
        registry
            .declare("cpu_percent", MetricKind::Gauge, &[], "CPU usage")
            .unwrap();
        registry.set("cpu_percent", &[], 40.0).unwrap();
        registry.set("cpu_percent", &[], 72.5).unwrap();
        assert_eq!(registry.gauge_value("cpu_percent", &[]), Some(72.5));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricRegistry::new();
        registry
            .declare_histogram("duration_seconds", &["operation"], "Duration", &[0.1, 1.0, 5.0])
            .unwrap();

        for value in [0.05, 0.5, 0.5, 3.0, 30.0] {
            registry.observe("duration_seconds", &["fetch"], value).unwrap();
        }

        let snapshot = registry.snapshot();
        let series = &snapshot[0];
        let AggregateValue::Histogram(hist) = &series.samples[0].value else {
            panic!("expected histogram aggregate");
        };

        assert_eq!(hist.count, 5);
        assert!((hist.sum - 34.05).abs() < 1e-9);
        // Cumulative: <=0.1 -> 1, <=1.0 -> 3, <=5.0 -> 4; the 30.0 sample
        // only appears in the implicit +Inf count.
        assert_eq!(hist.buckets[0].cumulative, 1);
        assert_eq!(hist.buckets[1].cumulative, 3);
        assert_eq!(hist.buckets[2].cumulative, 4);
    }

    #[test]
    fn rejects_non_finite_values() {
        let registry = registry_with_counter();
        let err = registry
            .observe("requests_total", &["fetch", "success"], f64::NAN)
            .unwrap_err();
        assert!(matches!(err, MonitoringError::InvalidSample { .. }));
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = registry_with_counter();
        registry
            .declare("a_first", MetricKind::Gauge, &[], "First")
            .unwrap();
        registry.inc("requests_total", &["parse", "success"]).unwrap();
        registry.inc("requests_total", &["fetch", "success"]).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].name, "a_first");
        assert_eq!(snapshot[1].name, "requests_total");
        assert_eq!(snapshot[1].samples[0].label_values[0], "fetch");
        assert_eq!(snapshot[1].samples[1].label_values[0], "parse");
    }

    #[test]
    fn concurrent_observes_do_not_lose_updates() {
        let registry = std::sync::Arc::new(registry_with_counter());
        let threads = 8;
        let per_thread = 1_000;

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    // Half the threads hit a second cell to exercise
                    // different label-value combinations of one series.
                    let status = if i % 2 == 0 { "success" } else { "error" };
                    for _ in 0..per_thread {
                        registry.inc("requests_total", &["fetch", status]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let success = registry
            .counter_value("requests_total", &["fetch", "success"])
            .unwrap();
        let error = registry
            .counter_value("requests_total", &["fetch", "error"])
            .unwrap();
        assert_eq!(success as u64 + error as u64, threads * per_thread);
        assert_eq!(success as u64, threads / 2 * per_thread);
    }
}
