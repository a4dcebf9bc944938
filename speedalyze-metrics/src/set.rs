use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::agg::Aggregate;
use crate::collector::Snapshot;
use crate::metrics::HistogramSummary;
use crate::{Error, MetricKey, Operation, Result};

/// Named numeric values of one series, e.g. `med`, `p(95)`, `count`, `rate`.
pub type SeriesValues = BTreeMap<String, f64>;

/// A tagged metric namespace, keyed by rendered series key.
///
/// Lookups are by exact key text; callers that need to tolerate several key
/// encodings try each rendering in turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    series: BTreeMap<String, SeriesValues>,
    run_duration: Option<Duration>,
}

impl MetricSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_run_duration(mut self, run_duration: Duration) -> Self {
        self.run_duration = Some(run_duration);
        self
    }

    /// Wall-clock duration of the run that produced these metrics, if known.
    pub fn run_duration(&self) -> Option<Duration> {
        self.run_duration
    }

    pub fn insert(&mut self, key: impl ToString, values: SeriesValues) {
        self.series.insert(key.to_string(), values);
    }

    pub fn get(&self, key: &str) -> Option<&SeriesValues> {
        self.series.get(key)
    }

    pub fn value(&self, key: &str, field: &str) -> Option<f64> {
        self.series.get(key)?.get(field).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Exports a snapshot under k6-style keys. Latencies are in milliseconds.
    ///
    /// Every operation gets a `requests{route:<op>}` counter, zero when it
    /// issued nothing. Latency and error series exist only for operations
    /// with samples.
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot, run_duration: Option<Duration>) -> Self {
        let aggs = snapshot.aggregates();
        let secs = run_duration.map(|d| d.as_secs_f64());
        let mut set = MetricSet {
            series: BTreeMap::new(),
            run_duration,
        };

        for agg in aggs.iter() {
            let Some(op) = agg.operation else { continue };
            set.insert(
                MetricKey::new("requests").with_tag("route", op.as_str()),
                counter_values(agg.count, secs),
            );
            if agg.is_empty() {
                continue;
            }
            set.insert(latency_key(op), trend_values(agg));
            set.insert(
                MetricKey::new("errors").with_tag("type", op.as_str()),
                rate_values(agg),
            );
        }

        let overall = aggs.overall();
        if !overall.is_empty() {
            set.insert("http_req_duration", trend_values(overall));
            set.insert("errors", rate_values(overall));
            set.insert("http_reqs", counter_values(overall.count, secs));
        }

        if snapshot.iterations() > 0 {
            set.insert("iterations", counter_values(snapshot.iterations(), secs));
            set.insert(
                "iteration_duration",
                histogram_values(&snapshot.iteration_duration().as_millis()),
            );
        }

        set
    }

    /// Parses a k6 summary document.
    ///
    /// Accepts both the `handleSummary` shape, where each metric nests its
    /// numbers under `values` and the run length sits in
    /// `state.testRunDurationMs`, and the flat `--summary-export` shape.
    pub fn from_k6_summary_json(raw: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(raw)?;
        let metrics = doc
            .get("metrics")
            .and_then(Value::as_object)
            .ok_or(Error::MissingMetrics)?;

        let mut set = MetricSet::new();
        for (key, metric) in metrics {
            let values = metric.get("values").unwrap_or(metric);
            let Some(obj) = values.as_object() else {
                continue;
            };

            let mut out: SeriesValues = obj
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_f64()?)))
                .collect();

            // Flat exports spell a rate metric's ratio as `value`.
            if !out.contains_key("rate")
                && out.contains_key("passes")
                && out.contains_key("fails")
                && let Some(&v) = out.get("value")
            {
                out.insert("rate".to_string(), v);
            }

            set.series.insert(key.clone(), out);
        }

        set.run_duration = doc
            .pointer("/state/testRunDurationMs")
            .and_then(Value::as_f64)
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| Duration::from_secs_f64(ms / 1_000.0));

        Ok(set)
    }
}

fn ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

fn trend_values(agg: &Aggregate) -> SeriesValues {
    SeriesValues::from([
        ("count".to_string(), agg.count as f64),
        ("avg".to_string(), ms(agg.avg)),
        ("min".to_string(), ms(agg.min)),
        ("med".to_string(), ms(agg.p50)),
        ("max".to_string(), ms(agg.max)),
        ("p(90)".to_string(), ms(agg.p90)),
        ("p(95)".to_string(), ms(agg.p95)),
        ("p(99)".to_string(), ms(agg.p99)),
    ])
}

fn histogram_values(h: &HistogramSummary) -> SeriesValues {
    [
        ("avg", h.mean),
        ("min", h.min),
        ("med", h.p50),
        ("max", h.max),
        ("p(90)", h.p90),
        ("p(95)", h.p95),
    ]
    .into_iter()
    .filter_map(|(k, v)| Some((k.to_string(), v?)))
    .collect()
}

fn counter_values(count: u64, secs: Option<f64>) -> SeriesValues {
    let mut out = SeriesValues::from([("count".to_string(), count as f64)]);
    if let Some(secs) = secs {
        out.insert("rate".to_string(), crate::per_sec(count, secs));
    }
    out
}

fn rate_values(agg: &Aggregate) -> SeriesValues {
    SeriesValues::from([
        ("rate".to_string(), agg.error_rate),
        ("passes".to_string(), agg.failures as f64),
        ("fails".to_string(), (agg.count - agg.failures) as f64),
    ])
}

/// Series key of the per-operation latency trend.
#[must_use]
pub fn latency_key(op: Operation) -> MetricKey {
    MetricKey::new("http_req_duration").with_tag("type", op.as_str())
}
