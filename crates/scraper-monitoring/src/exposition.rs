//! Prometheus text exposition of registry snapshots.
//!
//! The registry owns the label schema; the exporter merges the constant
//! [`ScraperIdentity`] labels in front of each cell's labels at render time.
//! The resulting string is what an external HTTP layer serves on its metrics
//! endpoint.

use crate::config::ScraperIdentity;
use crate::registry::{AggregateValue, SeriesSnapshot};

/// Render registry snapshots into the Prometheus text format.
pub fn render_prometheus(snapshots: &[SeriesSnapshot], identity: &ScraperIdentity) -> String {
    let base_labels = identity.base_labels();
    let mut out = String::new();

    for series in snapshots {
        out.push_str(&format!("# HELP {} {}\n", series.name, series.help));
        out.push_str(&format!("# TYPE {} {}\n", series.name, series.kind));

        for sample in &series.samples {
            match &sample.value {
                AggregateValue::Counter(value) | AggregateValue::Gauge(value) => {
                    let labels = format_labels(
                        &base_labels,
                        &series.label_names,
                        &sample.label_values,
                        None,
                    );
                    out.push_str(&format!("{}{} {}\n", series.name, labels, value));
                }
                AggregateValue::Histogram(hist) => {
                    for bucket in &hist.buckets {
                        let le = format_le(bucket.le);
                        let labels = format_labels(
                            &base_labels,
                            &series.label_names,
                            &sample.label_values,
                            Some(("le", le.as_str())),
                        );
                        out.push_str(&format!(
                            "{}_bucket{} {}\n",
                            series.name, labels, bucket.cumulative
                        ));
                    }
                    let inf_labels = format_labels(
                        &base_labels,
                        &series.label_names,
                        &sample.label_values,
                        Some(("le", "+Inf")),
                    );
                    out.push_str(&format!(
                        "{}_bucket{} {}\n",
                        series.name, inf_labels, hist.count
                    ));

                    let labels = format_labels(
                        &base_labels,
                        &series.label_names,
                        &sample.label_values,
                        None,
                    );
                    out.push_str(&format!("{}_sum{} {}\n", series.name, labels, hist.sum));
                    out.push_str(&format!("{}_count{} {}\n", series.name, labels, hist.count));
                }
            }
        }
    }

    out
}

/// Build the `{k="v",...}` label block: identity labels first, then the
/// series' own labels, then an optional trailing pair (`le` for buckets).
fn format_labels(
    base: &[(String, String)],
    names: &[String],
    values: &[String],
    extra: Option<(&str, &str)>,
) -> String {
    let mut pairs: Vec<String> = base
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    pairs.extend(
        names
            .iter()
            .zip(values)
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v))),
    );
    if let Some((k, v)) = extra {
        pairs.push(format!("{}=\"{}\"", k, v));
    }

    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Bucket boundaries render without a trailing `.0` only when fractional.
fn format_le(le: f64) -> String {
    if le == le.trunc() {
        format!("{:.1}", le)
    } else {
        format!("{}", le)
    }
}
