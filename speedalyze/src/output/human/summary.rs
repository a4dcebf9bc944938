use std::fmt::Write as _;
use std::time::Duration;

use speedalyze_core::ThresholdViolation;
use speedalyze_core::metrics::{Aggregate, Operation};

use super::format::*;
use crate::output::RunReport;

fn ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

pub(crate) fn render(report: &RunReport<'_>) -> String {
    let mut out = String::new();
    let outcome = report.outcome;
    let overall = report.aggregates.overall();

    out.push_str("summary\n");
    writeln!(
        &mut out,
        "  run: {} (peak vus {}, spawned {})",
        format_duration(outcome.duration),
        outcome.peak_vus,
        outcome.spawned_vus
    )
    .ok();
    writeln!(
        &mut out,
        "  iterations: {} (interrupted {})",
        outcome.completed_iterations, outcome.interrupted_iterations
    )
    .ok();
    if outcome.missed_spawns > 0 || outcome.forced_terminations > 0 {
        writeln!(
            &mut out,
            "  missed_spawns: {} forced_terminations: {}",
            outcome.missed_spawns, outcome.forced_terminations
        )
        .ok();
    }
    writeln!(
        &mut out,
        "  requests: {} (failed {}, error rate {})",
        overall.count,
        overall.failures,
        format_percent(overall.error_rate)
    )
    .ok();
    out.push('\n');

    writeln!(
        &mut out,
        "  {:<8} {:>8} {:>7} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}",
        "endpoint", "count", "failed", "p50", "p95", "p99", "max", "rps", "errors"
    )
    .ok();

    let record = report.record;
    for (i, op) in record.throughput.labels.iter().enumerate() {
        let agg = report.aggregates.aggregate(*op);
        render_row(
            &mut out,
            *op,
            agg,
            record.throughput.rps.get(i).copied().unwrap_or(0.0),
        );
    }
    out.push('\n');

    render_violations(report.violations, &mut out);
    writeln!(&mut out, "artifact: {}", report.artifact.display()).ok();

    out
}

fn render_row(out: &mut String, op: Operation, agg: &Aggregate, rps: f64) {
    if agg.is_empty() {
        writeln!(out, "  {:<8} {:>8}", op.as_str(), "n/a").ok();
        return;
    }

    writeln!(
        out,
        "  {:<8} {:>8} {:>7} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}",
        op.as_str(),
        agg.count,
        agg.failures,
        format_ms(ms(agg.p50)),
        format_ms(ms(agg.p95)),
        format_ms(ms(agg.p99)),
        format_ms(ms(agg.max)),
        format_rate(rps),
        format_percent(agg.error_rate)
    )
    .ok();
}

fn render_violations(violations: &[ThresholdViolation], out: &mut String) {
    if violations.is_empty() {
        out.push_str("thresholds: ok\n");
        return;
    }

    writeln!(out, "thresholds failed: {}", violations.len()).ok();
    for v in violations {
        let observed = v
            .observed
            .map_or_else(|| "no data".to_string(), |obs| format!("observed {obs:.3}"));
        writeln!(out, "  {}: {} ({observed})", v.metric, v.expression).ok();
    }
}
