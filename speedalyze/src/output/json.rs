use serde::Serialize;
use std::io::Write as _;
use std::sync::{Arc, Mutex};

use speedalyze_core::metrics::RunningStats;
use speedalyze_core::{ProgressFn, ProgressUpdate, SummaryRecord};

use super::{OutputFormatter, RunReport};
use crate::config::RunConfig;

/// NDJSON on stdout: one `progress` line per second, one `summary` line at the end.
pub(crate) struct JsonOutput {
    rps: Arc<Mutex<RunningStats>>,
}

impl JsonOutput {
    pub(crate) fn new() -> Self {
        Self {
            rps: Arc::new(Mutex::new(RunningStats::default())),
        }
    }
}

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _cfg: &RunConfig) {}

    fn progress(&self) -> Option<ProgressFn> {
        let rps = self.rps.clone();
        Some(Arc::new(move |u| {
            let stats = {
                let mut stats = rps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                stats.push(u.rps_now);
                *stats
            };
            emit_json_line(&build_progress_line(&u, &stats));
        }))
    }

    fn print_summary(&self, report: &RunReport<'_>) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(report));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub state: String,

    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub target_vus: Option<u64>,
    pub active_vus: u64,

    pub requests_per_sec: f64,
    pub iterations_per_sec: f64,
    pub error_rate: f64,

    pub total_requests: u64,
    pub total_failures: u64,
    pub total_iterations: u64,

    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,

    pub req_per_sec_avg: f64,
    pub req_per_sec_stdev: f64,
    pub req_per_sec_max: f64,
}

fn build_progress_line(u: &ProgressUpdate, rps: &RunningStats) -> JsonProgressLine {
    let latency = u.totals.latency.as_millis();

    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        state: u.state.to_string(),

        stage: u.stage.as_ref().map(|s| s.stage),
        stages: u.stage.as_ref().map(|s| s.stages),
        target_vus: u.stage.as_ref().map(|s| s.current_target),
        active_vus: u.active_vus,

        requests_per_sec: u.rps_now,
        iterations_per_sec: u.iterations_per_sec_now,
        error_rate: u.error_rate_now,

        total_requests: u.totals.requests,
        total_failures: u.totals.failures,
        total_iterations: u.totals.iterations,

        latency_p50_ms: latency.p50,
        latency_p95_ms: latency.p95,
        latency_p99_ms: latency.p99,
        latency_max_ms: latency.max,

        req_per_sec_avg: rps.mean(),
        req_per_sec_stdev: rps.stdev(),
        req_per_sec_max: rps.max(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonViolation {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    pub duration_secs: f64,
    pub peak_vus: u64,
    pub spawned_vus: u64,
    pub completed_iterations: u64,
    pub interrupted_iterations: u64,
    pub missed_spawns: u64,
    pub forced_terminations: u64,

    pub total_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,

    pub thresholds_failed: usize,
    pub violations: Vec<JsonViolation>,

    pub artifact: String,
    pub record: &'a SummaryRecord,
}

fn build_summary_line<'a>(report: &RunReport<'a>) -> JsonSummaryLine<'a> {
    let outcome = report.outcome;
    let overall = report.aggregates.overall();

    JsonSummaryLine {
        kind: "summary",
        duration_secs: outcome.duration.as_secs_f64(),
        peak_vus: outcome.peak_vus,
        spawned_vus: outcome.spawned_vus,
        completed_iterations: outcome.completed_iterations,
        interrupted_iterations: outcome.interrupted_iterations,
        missed_spawns: outcome.missed_spawns,
        forced_terminations: outcome.forced_terminations,

        total_requests: overall.count,
        failed_requests: overall.failures,
        error_rate: overall.error_rate,

        thresholds_failed: report.violations.len(),
        violations: report
            .violations
            .iter()
            .map(|v| JsonViolation {
                metric: v.metric.clone(),
                expression: v.expression.clone(),
                observed: v.observed,
            })
            .collect(),

        artifact: report.artifact.display().to_string(),
        record: report.record,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use serde_json::Value;
    use speedalyze_core::metrics::{LiveTotals, MetricSet, Operation, Sample, Snapshot};
    use speedalyze_core::{RunOutcome, SchedulerState, SummaryBuilder, ThresholdViolation};

    use super::*;

    #[test]
    fn progress_line_has_kind_and_running_rps() {
        let mut stats = RunningStats::default();
        stats.push(100.0);
        stats.push(300.0);

        let u = ProgressUpdate {
            tick: 2,
            elapsed: Duration::from_secs(2),
            total_duration: Duration::from_secs(10),
            state: SchedulerState::Ramping,
            stage: None,
            active_vus: 4,
            rps_now: 300.0,
            error_rate_now: 0.5,
            iterations_per_sec_now: 60.0,
            totals: LiveTotals {
                requests: 400,
                failures: 2,
                iterations: 80,
                ..LiveTotals::default()
            },
        };

        let v = serde_json::to_value(build_progress_line(&u, &stats))
            .unwrap_or_else(|err| panic!("to_value failed: {err}"));
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("state").and_then(Value::as_str), Some("ramping"));
        assert_eq!(v.get("stage"), Some(&Value::Null));
        assert_eq!(v.get("total_requests").and_then(Value::as_u64), Some(400));
        assert_eq!(v.get("req_per_sec_avg").and_then(Value::as_f64), Some(200.0));
        assert_eq!(v.get("req_per_sec_max").and_then(Value::as_f64), Some(300.0));
    }

    #[test]
    fn summary_line_embeds_the_artifact_record() {
        let snapshot = Snapshot::from_samples([
            Sample::new(Operation::List, Duration::from_millis(5), true),
            Sample::new(Operation::List, Duration::from_millis(7), false),
        ]);
        let aggregates = snapshot.aggregates();
        let record = SummaryBuilder::new(1)
            .build(&MetricSet::from_snapshot(&snapshot, Some(Duration::from_secs(1))));
        let outcome = RunOutcome {
            peak_vus: 1,
            ..RunOutcome::default()
        };
        let violations = [ThresholdViolation {
            metric: "errors".to_string(),
            expression: "rate<0.01".to_string(),
            observed: Some(0.5),
        }];

        let line = build_summary_line(&RunReport {
            outcome: &outcome,
            aggregates: &aggregates,
            record: &record,
            violations: &violations,
            artifact: Path::new("out.json"),
        });
        let v = serde_json::to_value(&line).unwrap_or_else(|err| panic!("to_value failed: {err}"));

        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(v.get("total_requests").and_then(Value::as_u64), Some(2));
        assert_eq!(v.get("thresholds_failed").and_then(Value::as_u64), Some(1));
        assert_eq!(v.get("artifact").and_then(Value::as_str), Some("out.json"));
        assert_eq!(
            v.pointer("/record/errorRate/rate/0").and_then(Value::as_f64),
            Some(0.5)
        );
        assert_eq!(
            v.pointer("/record/latency/labels/0").and_then(Value::as_str),
            Some("list")
        );
    }
}
