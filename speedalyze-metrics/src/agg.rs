use std::time::Duration;

use crate::collector::Snapshot;
use crate::{Operation, Sample};

/// Statistics over the samples of one operation, or of all operations when
/// `operation` is `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub operation: Option<Operation>,
    pub count: u64,
    pub failures: u64,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub error_rate: f64,
}

impl Aggregate {
    #[must_use]
    pub fn empty(operation: Option<Operation>) -> Self {
        Self {
            operation,
            count: 0,
            failures: 0,
            p50: Duration::ZERO,
            p90: Duration::ZERO,
            p95: Duration::ZERO,
            p99: Duration::ZERO,
            min: Duration::ZERO,
            max: Duration::ZERO,
            avg: Duration::ZERO,
            error_rate: 0.0,
        }
    }

    /// `sorted` must be in ascending order.
    #[must_use]
    pub fn from_sorted(operation: Option<Operation>, sorted: &[Duration], failures: u64) -> Self {
        let Some((&min, &max)) = sorted.first().zip(sorted.last()) else {
            return Self::empty(operation);
        };

        let count = sorted.len() as u64;
        let total: u128 = sorted.iter().map(Duration::as_nanos).sum();
        let avg_nanos = u64::try_from(total / u128::from(count)).unwrap_or(u64::MAX);

        Self {
            operation,
            count,
            failures,
            p50: percentile(sorted, 50),
            p90: percentile(sorted, 90),
            p95: percentile(sorted, 95),
            p99: percentile(sorted, 99),
            min,
            max,
            avg: Duration::from_nanos(avg_nanos),
            error_rate: failures as f64 / count as f64,
        }
    }

    #[must_use]
    pub fn from_samples(operation: Option<Operation>, samples: &[Sample]) -> Self {
        let sorted = sorted_latencies(samples.iter());
        let failures = samples.iter().filter(|s| !s.succeeded).count() as u64;
        Self::from_sorted(operation, &sorted, failures)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Nearest-rank percentile: the smallest value with at least `p`% of the
/// distribution at or below it. `sorted` must be ascending.
#[must_use]
pub fn percentile(sorted: &[Duration], p: u32) -> Duration {
    let n = sorted.len();
    if n == 0 {
        return Duration::ZERO;
    }
    let p = p.min(100) as usize;
    let rank = (p * n).div_ceil(100).clamp(1, n);
    sorted[rank - 1]
}

fn sorted_latencies<'a>(samples: impl Iterator<Item = &'a Sample>) -> Vec<Duration> {
    let mut out: Vec<Duration> = samples.map(|s| s.latency).collect();
    out.sort_unstable();
    out
}

/// Per-operation and overall aggregates computed from one snapshot.
///
/// Keeps the sorted latency distributions so arbitrary percentiles can be
/// answered after the fact.
#[derive(Debug, Clone)]
pub struct Aggregates {
    per_op: [Aggregate; Operation::COUNT],
    overall: Aggregate,
    sorted: [Vec<Duration>; Operation::COUNT],
    all_sorted: Vec<Duration>,
}

impl Aggregates {
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let sorted: [Vec<Duration>; Operation::COUNT] =
            std::array::from_fn(|i| sorted_latencies(snapshot.samples(Operation::ALL[i]).iter()));

        let per_op: [Aggregate; Operation::COUNT] = std::array::from_fn(|i| {
            let op = Operation::ALL[i];
            let failures = snapshot
                .samples(op)
                .iter()
                .filter(|s| !s.succeeded)
                .count() as u64;
            Aggregate::from_sorted(Some(op), &sorted[i], failures)
        });

        let mut all_sorted: Vec<Duration> = sorted.iter().flatten().copied().collect();
        all_sorted.sort_unstable();
        let failures = per_op.iter().map(|a| a.failures).sum();
        let overall = Aggregate::from_sorted(None, &all_sorted, failures);

        Self {
            per_op,
            overall,
            sorted,
            all_sorted,
        }
    }

    #[must_use]
    pub fn aggregate(&self, operation: Operation) -> &Aggregate {
        &self.per_op[operation.index()]
    }

    #[must_use]
    pub fn overall(&self) -> &Aggregate {
        &self.overall
    }

    /// `None` selects all operations.
    #[must_use]
    pub fn select(&self, operation: Option<Operation>) -> &Aggregate {
        match operation {
            Some(op) => self.aggregate(op),
            None => self.overall(),
        }
    }

    #[must_use]
    pub fn percentile(&self, operation: Option<Operation>, p: u32) -> Duration {
        match operation {
            Some(op) => percentile(&self.sorted[op.index()], p),
            None => percentile(&self.all_sorted, p),
        }
    }

    #[must_use]
    pub fn global_error_rate(&self) -> f64 {
        self.overall.error_rate
    }

    pub fn iter(&self) -> impl Iterator<Item = &Aggregate> {
        self.per_op.iter()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.n = self.n.saturating_add(1);
        let n_f = self.n as f64;

        let delta = x - self.mean;
        self.mean += delta / n_f;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;

        if x > self.max {
            self.max = x;
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stdev(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        (self.m2 / (self.n as f64 - 1.0)).sqrt()
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[inline]
pub fn per_sec(delta: u64, dt_secs: f64) -> f64 {
    let dt = dt_secs.max(1e-9);
    delta as f64 / dt
}
