use std::time::Duration;

use serde::{Deserialize, Serialize};
use speedalyze_metrics::{MetricKey, MetricSet, Operation, TagEncoding, latency_key};

use crate::config::Scenario;

/// Run length assumed when neither a measured nor a configured one is known.
pub const FALLBACK_RUN_DURATION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub labels: Vec<Operation>,
    /// Milliseconds.
    pub p50: Vec<f64>,
    /// Milliseconds.
    pub p95: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSummary {
    pub labels: Vec<Operation>,
    pub rps: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRateSummary {
    pub labels: Vec<Operation>,
    pub rate: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub vus: u64,
    pub duration: String,
    pub endpoints: Vec<Operation>,
}

/// The persisted artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub latency: LatencySummary,
    pub throughput: ThroughputSummary,
    pub error_rate: ErrorRateSummary,
    pub environment: Environment,
}

impl SummaryRecord {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// One way of reading a number out of a [`MetricSet`].
#[derive(Debug, Clone)]
enum Lookup {
    /// `key.field` as is.
    Field { key: String, field: &'static str },
    /// `key.field` per second of run time. A present series is final, even at
    /// zero.
    Counter { key: String, field: &'static str },
    /// `key.field` per second of run time, split evenly over `parts`.
    SharedPerSecond {
        key: String,
        field: &'static str,
        parts: usize,
    },
}

impl Lookup {
    fn resolve(&self, metrics: &MetricSet, run_secs: f64) -> Option<f64> {
        match self {
            Lookup::Field { key, field } => metrics.value(key, field),
            Lookup::Counter { key, field } => Some(metrics.value(key, field)? / run_secs),
            Lookup::SharedPerSecond { key, field, parts } => {
                Some(metrics.value(key, field)? / run_secs / (*parts).max(1) as f64)
            }
        }
    }
}

/// First lookup producing a usable value. Zero counts as a miss unless the
/// lookup is a [`Lookup::Counter`].
fn first_hit(chain: &[Lookup], metrics: &MetricSet, run_secs: f64) -> f64 {
    for lookup in chain {
        let Some(v) = lookup.resolve(metrics, run_secs) else {
            continue;
        };
        if !v.is_finite() {
            continue;
        }
        if v != 0.0 || matches!(lookup, Lookup::Counter { .. }) {
            return v;
        }
    }
    0.0
}

const ENCODINGS: [TagEncoding; 2] = [TagEncoding::Colon, TagEncoding::Equals];

/// Resolves raw metrics into a [`SummaryRecord`], tolerating both `{k:v}` and
/// `{k=v}` tag encodings and missing series.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryBuilder {
    endpoints: Vec<Operation>,
    vus: u64,
    nominal_duration: Option<Duration>,
}

impl SummaryBuilder {
    pub fn new(vus: u64) -> Self {
        Self {
            endpoints: Operation::ALL.to_vec(),
            vus,
            nominal_duration: None,
        }
    }

    pub fn for_scenario(scenario: &Scenario) -> Self {
        Self::new(scenario.max_vus()).with_nominal_duration(scenario.total_duration())
    }

    #[must_use]
    pub fn with_nominal_duration(mut self, duration: Duration) -> Self {
        self.nominal_duration = Some(duration);
        self
    }

    /// Measured duration if the metrics carry one, else the configured one,
    /// else [`FALLBACK_RUN_DURATION`].
    pub fn effective_run_duration_seconds(&self, metrics: &MetricSet) -> f64 {
        [metrics.run_duration(), self.nominal_duration]
            .into_iter()
            .flatten()
            .find(|d| !d.is_zero())
            .unwrap_or(FALLBACK_RUN_DURATION)
            .as_secs_f64()
    }

    fn p50_chain(op: Operation) -> Vec<Lookup> {
        ENCODINGS
            .iter()
            .flat_map(|&enc| {
                let key = latency_key(op).encoded(enc).to_string();
                ["med", "p(90)", "avg"].map(|field| Lookup::Field {
                    key: key.clone(),
                    field,
                })
            })
            .collect()
    }

    fn p95_chain(op: Operation) -> Vec<Lookup> {
        ENCODINGS
            .iter()
            .map(|&enc| Lookup::Field {
                key: latency_key(op).encoded(enc).to_string(),
                field: "p(95)",
            })
            .collect()
    }

    fn rps_chain(&self, op: Operation) -> Vec<Lookup> {
        let mut chain: Vec<Lookup> = ENCODINGS
            .iter()
            .map(|&enc| Lookup::Counter {
                key: MetricKey::new("requests")
                    .with_tag("route", op.as_str())
                    .encoded(enc)
                    .to_string(),
                field: "count",
            })
            .collect();
        chain.push(Lookup::SharedPerSecond {
            key: "http_reqs".to_string(),
            field: "count",
            parts: self.endpoints.len(),
        });
        chain
    }

    fn error_rate_chain(op: Operation) -> Vec<Lookup> {
        ENCODINGS
            .iter()
            .map(|&enc| Lookup::Field {
                key: MetricKey::new("errors")
                    .with_tag("type", op.as_str())
                    .encoded(enc)
                    .to_string(),
                field: "rate",
            })
            .collect()
    }

    /// Never fails; unresolved fields are 0.
    pub fn build(&self, metrics: &MetricSet) -> SummaryRecord {
        let secs = self.effective_run_duration_seconds(metrics);
        let labels = self.endpoints.clone();
        let per_op = |chain: &dyn Fn(Operation) -> Vec<Lookup>| -> Vec<f64> {
            self.endpoints
                .iter()
                .map(|&op| first_hit(&chain(op), metrics, secs))
                .collect()
        };

        SummaryRecord {
            latency: LatencySummary {
                labels: labels.clone(),
                p50: per_op(&Self::p50_chain),
                p95: per_op(&Self::p95_chain),
            },
            throughput: ThroughputSummary {
                labels: labels.clone(),
                rps: per_op(&|op: Operation| self.rps_chain(op)),
            },
            error_rate: ErrorRateSummary {
                labels: labels.clone(),
                rate: per_op(&Self::error_rate_chain),
            },
            environment: Environment {
                vus: self.vus,
                duration: humantime::format_duration(
                    self.nominal_duration.unwrap_or(FALLBACK_RUN_DURATION),
                )
                .to_string(),
                endpoints: labels,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speedalyze_metrics::{SeriesValues, Snapshot, Sample};

    fn values(pairs: &[(&str, f64)]) -> SeriesValues {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn builder() -> SummaryBuilder {
        SummaryBuilder::new(50).with_nominal_duration(Duration::from_secs(600))
    }

    #[test]
    fn reads_colon_encoded_series() {
        let mut m = MetricSet::new();
        m.insert(
            "http_req_duration{type:list}",
            values(&[("med", 12.5), ("p(90)", 20.0), ("p(95)", 31.0)]),
        );
        m.insert("requests{route:list}", values(&[("count", 1200.0)]));
        m.insert("errors{type:list}", values(&[("rate", 0.002)]));

        let r = builder().build(&m);
        assert_eq!(r.latency.p50[0], 12.5);
        assert_eq!(r.latency.p95[0], 31.0);
        assert_eq!(r.throughput.rps[0], 2.0);
        assert_eq!(r.error_rate.rate[0], 0.002);
    }

    #[test]
    fn p50_falls_back_through_p90_avg_and_equals_encoding() {
        let mut m = MetricSet::new();
        // Zero med is a miss.
        m.insert(
            "http_req_duration{type:list}",
            values(&[("med", 0.0), ("p(90)", 9.0)]),
        );
        m.insert("http_req_duration{type:detail}", values(&[("avg", 4.0)]));
        m.insert(
            "http_req_duration{type=create}",
            values(&[("med", 7.0), ("p(95)", 70.0)]),
        );

        let r = builder().build(&m);
        assert_eq!(r.latency.p50, vec![9.0, 4.0, 7.0, 0.0, 0.0]);
        assert_eq!(r.latency.p95, vec![0.0, 0.0, 70.0, 0.0, 0.0]);
    }

    #[test]
    fn rps_falls_back_to_shared_total() {
        let mut m = MetricSet::new();
        m.insert("requests{route=update}", values(&[("count", 300.0)]));
        m.insert("http_reqs", values(&[("count", 6000.0)]));

        let r = builder().build(&m);
        // 6000 / 600s / 5 endpoints
        assert_eq!(r.throughput.rps, vec![2.0, 2.0, 2.0, 0.5, 2.0]);
    }

    #[test]
    fn idle_operations_report_zero_throughput() {
        // Every create fails, so detail, update and delete never run.
        let samples = (0..600u64).flat_map(|i| {
            let ms = Duration::from_millis(5 + i % 10);
            [
                Sample::new(Operation::Create, ms, false),
                Sample::new(Operation::List, ms, true),
            ]
        });
        let metrics = MetricSet::from_snapshot(
            &Snapshot::from_samples(samples),
            Some(Duration::from_secs(60)),
        );

        let r = SummaryBuilder::new(1).build(&metrics);
        assert_eq!(r.throughput.rps, vec![10.0, 0.0, 10.0, 0.0, 0.0]);
        assert_eq!(r.error_rate.rate, vec![0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn rps_is_count_over_measured_duration() {
        let samples =
            (0..6_000u64).map(|_| Sample::new(Operation::Update, Duration::from_millis(8), true));
        let metrics = MetricSet::from_snapshot(
            &Snapshot::from_samples(samples),
            Some(Duration::from_secs(600)),
        );

        let r = builder().build(&metrics);
        assert_eq!(r.throughput.rps, vec![0.0, 0.0, 0.0, 10.0, 0.0]);
    }

    #[test]
    fn error_rate_accepts_equals_encoding() {
        let mut m = MetricSet::new();
        m.insert("errors{type=delete}", values(&[("rate", 0.25)]));
        let r = builder().build(&m);
        assert_eq!(r.error_rate.rate, vec![0.0, 0.0, 0.0, 0.0, 0.25]);
    }

    #[test]
    fn effective_duration_prefers_measured_then_nominal_then_default() {
        let measured = MetricSet::new().with_run_duration(Duration::from_secs(120));
        assert_eq!(builder().effective_run_duration_seconds(&measured), 120.0);
        assert_eq!(builder().effective_run_duration_seconds(&MetricSet::new()), 600.0);
        assert_eq!(
            SummaryBuilder::new(1).effective_run_duration_seconds(&MetricSet::new()),
            600.0
        );
        let nominal = SummaryBuilder::new(1).with_nominal_duration(Duration::from_secs(30));
        assert_eq!(nominal.effective_run_duration_seconds(&MetricSet::new()), 30.0);
    }

    #[test]
    fn empty_metrics_build_a_zero_record() {
        let r = builder().build(&MetricSet::new());
        assert_eq!(r.latency.labels, Operation::ALL.to_vec());
        assert!(r.latency.p50.iter().all(|v| *v == 0.0));
        assert!(r.throughput.rps.iter().all(|v| *v == 0.0));
        assert!(r.error_rate.rate.iter().all(|v| *v == 0.0));
        assert_eq!(r.environment.vus, 50);
        assert_eq!(r.environment.duration, "10m");
    }

    #[test]
    fn artifact_shape_and_idempotence() {
        let samples = Operation::ALL.iter().flat_map(|&op| {
            (1..=20u64).map(move |v| Sample::new(op, Duration::from_millis(v), v != 20))
        });
        let metrics = MetricSet::from_snapshot(
            &Snapshot::from_samples(samples),
            Some(Duration::from_secs(10)),
        );

        let b = SummaryBuilder::for_scenario(&Scenario::reference());
        let first = b.build(&metrics).to_json_pretty().unwrap_or_else(|e| panic!("{e}"));
        let second = b.build(&metrics).to_json_pretty().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first, second);

        let v: serde_json::Value = serde_json::from_str(&first).unwrap_or_else(|e| panic!("{e}"));
        let labels = serde_json::json!(["list", "detail", "create", "update", "delete"]);
        assert_eq!(v["latency"]["labels"], labels);
        assert_eq!(v["throughput"]["labels"], labels);
        assert_eq!(v["errorRate"]["labels"], labels);
        assert_eq!(v["environment"]["endpoints"], labels);
        assert_eq!(v["environment"]["vus"], 50);
        assert_eq!(v["environment"]["duration"], "9m 20s");
        assert_eq!(v["latency"]["p50"][0], 10.0);
        assert_eq!(v["latency"]["p95"][0], 19.0);
        assert_eq!(v["throughput"]["rps"][0], 2.0);
        assert_eq!(v["errorRate"]["rate"][0], 0.05);

        let back: SummaryRecord = serde_json::from_str(&first).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(back, b.build(&metrics));
    }
}
