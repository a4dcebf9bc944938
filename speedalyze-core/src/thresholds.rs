use std::time::Duration;

use speedalyze_metrics::{Aggregates, MetricKey, Operation};

use crate::{Error, Result};

/// Expressions attached to one metric selector, e.g.
/// `http_req_duration{type:list}: ["p(95)<200"]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

impl ThresholdSet {
    pub fn new(metric: impl Into<String>, expressions: &[&str]) -> Self {
        Self {
            metric: metric.into(),
            expressions: expressions.iter().map(|e| (*e).to_string()).collect(),
        }
    }
}

/// Per-operation latency ceilings and a 1% error budget.
#[must_use]
pub fn default_thresholds() -> Vec<ThresholdSet> {
    vec![
        ThresholdSet::new("http_req_duration{type:list}", &["p(95)<200"]),
        ThresholdSet::new("http_req_duration{type:detail}", &["p(95)<200"]),
        ThresholdSet::new("http_req_duration{type:create}", &["p(95)<300"]),
        ThresholdSet::new("http_req_duration{type:update}", &["p(95)<300"]),
        ThresholdSet::new("http_req_duration{type:delete}", &["p(95)<200"]),
        ThresholdSet::new("errors", &["rate<0.01"]),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdViolation {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Duration,
    Errors,
    Requests,
}

impl MetricKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "http_req_duration" => Some(Self::Duration),
            "errors" | "http_req_failed" => Some(Self::Errors),
            "requests" | "http_reqs" => Some(Self::Requests),
            _ => None,
        }
    }
}

/// A parsed metric selector. `kind` is `None` for metrics this harness does
/// not produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Selector {
    kind: Option<MetricKind>,
    operation: Option<Operation>,
}

fn parse_selector(raw: &str) -> Result<Selector> {
    let key = MetricKey::parse(raw)?;

    let mut operation = None;
    for (k, v) in key.tags() {
        if !matches!(k.as_str(), "type" | "route") {
            return Err(Error::InvalidThreshold {
                metric: raw.to_string(),
                expression: String::new(),
                reason: format!("unsupported tag `{k}` (expected `type` or `route`)"),
            });
        }
        let op: Operation = v
            .parse()
            .map_err(|_| Error::UnknownOperation(v.to_string()))?;
        operation = Some(op);
    }

    Ok(Selector {
        kind: MetricKind::from_name(key.name()),
        operation,
    })
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("med") {
        ThresholdAgg::Med
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: u32 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if !(1..=100).contains(&p) {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { agg, op, value })
}

/// Checks every selector and expression without evaluating anything.
pub fn validate_thresholds(sets: &[ThresholdSet]) -> Result<()> {
    for set in sets {
        parse_selector(&set.metric)?;
        for expr in &set.expressions {
            parse_threshold_expr(expr).map_err(|reason| Error::InvalidThreshold {
                metric: set.metric.clone(),
                expression: expr.clone(),
                reason,
            })?;
        }
    }
    Ok(())
}

/// Evaluates thresholds over final aggregates. Latency values are compared in
/// milliseconds. An empty result means every threshold passed.
pub fn evaluate_thresholds(
    aggregates: &Aggregates,
    sets: &[ThresholdSet],
) -> Result<Vec<ThresholdViolation>> {
    let mut out = Vec::new();

    for set in sets {
        let selector = parse_selector(&set.metric)?;

        for expr_raw in &set.expressions {
            let expr = parse_threshold_expr(expr_raw).map_err(|reason| Error::InvalidThreshold {
                metric: set.metric.clone(),
                expression: expr_raw.clone(),
                reason,
            })?;
            let observed = observed_value(aggregates, selector, expr.agg);
            let passed = observed
                .map(|v| compare(v, expr.op, expr.value))
                .unwrap_or(false);
            if !passed {
                out.push(ThresholdViolation {
                    metric: set.metric.clone(),
                    expression: expr_raw.clone(),
                    observed,
                });
            }
        }
    }

    Ok(out)
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

fn observed_value(aggregates: &Aggregates, selector: Selector, agg: ThresholdAgg) -> Option<f64> {
    let a = aggregates.select(selector.operation);

    match (selector.kind?, agg) {
        (MetricKind::Duration, ThresholdAgg::Count) => Some(a.count as f64),
        // Latency of nothing is undefined.
        (MetricKind::Duration, _) if a.is_empty() => None,
        (MetricKind::Duration, ThresholdAgg::P(p)) => {
            Some(ms(aggregates.percentile(selector.operation, p)))
        }
        (MetricKind::Duration, ThresholdAgg::Med) => Some(ms(a.p50)),
        (MetricKind::Duration, ThresholdAgg::Avg) => Some(ms(a.avg)),
        (MetricKind::Duration, ThresholdAgg::Min) => Some(ms(a.min)),
        (MetricKind::Duration, ThresholdAgg::Max) => Some(ms(a.max)),

        (MetricKind::Errors, ThresholdAgg::Rate) => Some(a.error_rate),
        (MetricKind::Errors, ThresholdAgg::Count) => Some(a.failures as f64),

        (MetricKind::Requests, ThresholdAgg::Count) => Some(a.count as f64),

        // Non-sensical combinations.
        (_, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speedalyze_metrics::{Sample, Snapshot};

    fn aggregates() -> Aggregates {
        let mut samples = Vec::new();
        for v in 1..=100u64 {
            samples.push(Sample::new(Operation::List, Duration::from_millis(v), true));
        }
        for v in 1..=10u64 {
            samples.push(Sample::new(
                Operation::Create,
                Duration::from_millis(100 * v),
                v < 9,
            ));
        }
        Snapshot::from_samples(samples).aggregates()
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  p(95)  <  200  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::P(95));
        assert_eq!(expr.op, ThresholdOp::Lt);
        assert_eq!(expr.value, 200.0);

        let med = parse_threshold_expr("med<=5").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(med.agg, ThresholdAgg::Med);
        assert_eq!(med.op, ThresholdOp::Lte);
    }

    #[test]
    fn parse_threshold_expr_rejects_garbage() {
        for bad in ["", "p(101)<1", "p(0)<1", "p95<1", "rate", "rate<abc", "<1"] {
            assert!(parse_threshold_expr(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn defaults_pass_on_a_fast_healthy_run() {
        let samples = Operation::ALL
            .iter()
            .flat_map(|&op| (1..=50u64).map(move |v| Sample::new(op, Duration::from_millis(v), true)));
        let aggs = Snapshot::from_samples(samples).aggregates();
        let violations =
            evaluate_thresholds(&aggs, &default_thresholds()).unwrap_or_else(|e| panic!("{e}"));
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn per_operation_latency_and_error_rate() {
        let aggs = aggregates();
        let sets = vec![
            ThresholdSet::new("http_req_duration{type:list}", &["p(95)<200", "p(50)==50"]),
            ThresholdSet::new("http_req_duration{type=create}", &["p(95)<300", "max<=1000"]),
            ThresholdSet::new("errors", &["rate<0.01"]),
            ThresholdSet::new("errors{type:list}", &["rate==0"]),
            ThresholdSet::new("http_reqs", &["count==110"]),
        ];
        let violations = evaluate_thresholds(&aggs, &sets).unwrap_or_else(|e| panic!("{e}"));

        let failed: Vec<(&str, &str)> = violations
            .iter()
            .map(|v| (v.metric.as_str(), v.expression.as_str()))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("http_req_duration{type=create}", "p(95)<300"),
                ("errors", "rate<0.01"),
            ]
        );
        assert_eq!(violations[0].observed, Some(1000.0));
        let rate = violations[1].observed.unwrap_or_default();
        assert!((rate - 2.0 / 110.0).abs() < 1e-12);
    }

    #[test]
    fn slow_failed_create_breaks_the_create_latency_bound() {
        let aggs = Snapshot::from_samples([
            Sample::new(Operation::Create, Duration::from_millis(120), true),
            Sample::new(Operation::Create, Duration::from_millis(400), false),
            Sample::new(Operation::List, Duration::from_millis(50), true),
        ])
        .aggregates();
        let sets = vec![ThresholdSet::new("http_req_duration{type:create}", &["p(95)<300"])];

        let violations = evaluate_thresholds(&aggs, &sets).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].metric, "http_req_duration{type:create}");
        assert_eq!(violations[0].expression, "p(95)<300");
        assert_eq!(violations[0].observed, Some(400.0));
    }

    #[test]
    fn unknown_metrics_and_empty_latency_fail_without_observation() {
        let aggs = aggregates();
        let sets = vec![
            ThresholdSet::new("does_not_exist", &["avg>0"]),
            ThresholdSet::new("http_req_duration{type:delete}", &["p(95)<200"]),
        ];
        let violations = evaluate_thresholds(&aggs, &sets).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.observed.is_none()));
    }

    #[test]
    fn validation_rejects_bad_selectors_and_expressions() {
        assert!(matches!(
            validate_thresholds(&[ThresholdSet::new("errors{type:upsert}", &["rate<1"])]),
            Err(Error::UnknownOperation(_))
        ));
        assert!(matches!(
            validate_thresholds(&[ThresholdSet::new("errors{method:GET}", &["rate<1"])]),
            Err(Error::InvalidThreshold { .. })
        ));
        assert!(matches!(
            validate_thresholds(&[ThresholdSet::new("errors", &["rate<<1"])]),
            Err(Error::InvalidThreshold { .. })
        ));
        assert!(validate_thresholds(&default_thresholds()).is_ok());
    }
}
