use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::agg::{Aggregate, Aggregates};
use crate::metrics::{HistogramSummary, new_default_histogram, record_duration, summarize_histogram};
use crate::{Operation, Sample};

#[derive(Debug)]
struct Shard {
    samples: Vec<Sample>,
    live: Histogram<u64>,
}

impl Shard {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
            live: new_default_histogram(),
        }
    }
}

/// Thread-safe sample recorder. One shard per operation so concurrent VUs
/// working on different steps do not contend.
#[derive(Debug)]
pub struct Collector {
    shards: [Mutex<Shard>; Operation::COUNT],
    requests: AtomicU64,
    failures: AtomicU64,
    iterations: AtomicU64,
    iteration_duration: Mutex<Histogram<u64>>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and live latency quantiles, cheap enough to read every second.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveTotals {
    pub requests: u64,
    pub failures: u64,
    pub iterations: u64,
    /// Microseconds.
    pub latency: HistogramSummary,
}

impl Collector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(Shard::new())),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            iteration_duration: Mutex::new(new_default_histogram()),
        }
    }

    pub fn record(&self, sample: Sample) {
        {
            let mut shard = self.shards[sample.operation.index()].lock();
            record_duration(&mut shard.live, sample.latency);
            shard.samples.push(sample);
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !sample.succeeded {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_iteration(&self, duration: Duration) {
        record_duration(&mut self.iteration_duration.lock(), duration);
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every recorded sample. Samples recorded concurrently with the
    /// call may or may not be included.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let samples = std::array::from_fn(|i| self.shards[i].lock().samples.clone());
        let iteration_duration = summarize_histogram(&self.iteration_duration.lock());
        Snapshot {
            samples,
            iterations: self.iterations.load(Ordering::Relaxed),
            iteration_duration,
        }
    }

    #[must_use]
    pub fn aggregate(&self, operation: Operation) -> Aggregate {
        let shard = self.shards[operation.index()].lock();
        Aggregate::from_samples(Some(operation), &shard.samples)
    }

    #[must_use]
    pub fn global_error_rate(&self) -> f64 {
        let (mut count, mut failures) = (0u64, 0u64);
        for shard in &self.shards {
            let shard = shard.lock();
            count += shard.samples.len() as u64;
            failures += shard.samples.iter().filter(|s| !s.succeeded).count() as u64;
        }
        if count == 0 {
            return 0.0;
        }
        failures as f64 / count as f64
    }

    #[must_use]
    pub fn live(&self) -> LiveTotals {
        let mut merged = new_default_histogram();
        for shard in &self.shards {
            let _ = merged.add(&shard.lock().live);
        }
        LiveTotals {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            latency: summarize_histogram(&merged),
        }
    }
}

/// Immutable copy of a collector's contents.
#[derive(Debug, Clone)]
pub struct Snapshot {
    samples: [Vec<Sample>; Operation::COUNT],
    iterations: u64,
    iteration_duration: HistogramSummary,
}

impl Snapshot {
    /// Builds a snapshot directly from samples, without iteration data.
    #[must_use]
    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut by_op: [Vec<Sample>; Operation::COUNT] = Default::default();
        for s in samples {
            by_op[s.operation.index()].push(s);
        }
        Self {
            samples: by_op,
            iterations: 0,
            iteration_duration: HistogramSummary::default(),
        }
    }

    #[must_use]
    pub fn samples(&self, operation: Operation) -> &[Sample] {
        &self.samples[operation.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Microseconds.
    #[must_use]
    pub fn iteration_duration(&self) -> &HistogramSummary {
        &self.iteration_duration
    }

    #[must_use]
    pub fn aggregates(&self) -> Aggregates {
        Aggregates::from_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn aggregate_without_samples_is_zero_valued() {
        let c = Collector::new();
        let agg = c.aggregate(Operation::Update);
        assert_eq!(agg.count, 0);
        assert_eq!(agg.p50, Duration::ZERO);
        assert_eq!(agg.p95, Duration::ZERO);
        assert_eq!(agg.error_rate, 0.0);
        assert_eq!(c.global_error_rate(), 0.0);
    }

    #[test]
    fn concurrent_records_are_all_kept() {
        let c = Arc::new(Collector::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        let op = Operation::ALL[(t + i as usize) % Operation::COUNT];
                        c.record(Sample::new(op, Duration::from_micros(100 + i), i % 10 != 0));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap_or_else(|_| panic!("recorder thread panicked"));
        }

        let snap = c.snapshot();
        assert_eq!(snap.len(), 8_000);

        let live = c.live();
        assert_eq!(live.requests, 8_000);
        assert_eq!(live.failures, 800);
        assert_eq!(live.latency.count, 8_000);
        assert!((c.global_error_rate() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn snapshot_is_detached_from_later_records() {
        let c = Collector::new();
        c.record(Sample::new(Operation::List, Duration::from_millis(3), true));
        let snap = c.snapshot();
        c.record(Sample::new(Operation::List, Duration::from_millis(4), true));

        assert_eq!(snap.samples(Operation::List).len(), 1);
        assert_eq!(c.snapshot().samples(Operation::List).len(), 2);
    }

    #[test]
    fn iterations_are_counted_and_timed() {
        let c = Collector::new();
        c.record_iteration(Duration::from_millis(50));
        c.record_iteration(Duration::from_millis(70));

        let snap = c.snapshot();
        assert_eq!(snap.iterations(), 2);
        assert_eq!(snap.iteration_duration().count, 2);
        assert_eq!(c.live().iterations, 2);
    }

    #[test]
    fn aggregate_matches_snapshot_aggregates() {
        let c = Collector::new();
        for ms in [5, 1, 9, 3, 7] {
            c.record(Sample::new(Operation::Detail, Duration::from_millis(ms), ms != 9));
        }
        let direct = c.aggregate(Operation::Detail);
        let from_snapshot = *c.snapshot().aggregates().aggregate(Operation::Detail);
        assert_eq!(direct, from_snapshot);
        assert_eq!(direct.p50, Duration::from_millis(5));
        assert_eq!(direct.failures, 1);
        assert_eq!(c.live().latency.count, 5);
    }
}
