use std::time::Duration;

use hdrhistogram::Histogram;

/// Quantile view over an hdrhistogram, in the histogram's unit (microseconds).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramSummary {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub count: u64,
}

impl HistogramSummary {
    /// Same summary with every value converted from microseconds to milliseconds.
    #[must_use]
    pub fn as_millis(&self) -> Self {
        let ms = |v: Option<f64>| v.map(|us| us / 1_000.0);
        Self {
            p50: ms(self.p50),
            p90: ms(self.p90),
            p95: ms(self.p95),
            p99: ms(self.p99),
            min: ms(self.min),
            max: ms(self.max),
            mean: ms(self.mean),
            stdev: ms(self.stdev),
            count: self.count,
        }
    }
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // Microsecond resolution, upper bound one hour.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

pub(crate) fn record_duration(h: &mut Histogram<u64>, d: Duration) {
    let us = u64::try_from(d.as_micros()).unwrap_or(u64::MAX).max(1);
    let _ = h.saturating_record(us);
}

pub(crate) fn summarize_histogram(h: &Histogram<u64>) -> HistogramSummary {
    let count = h.len();
    let map_val = |v| v as f64;

    HistogramSummary {
        p50: (count > 0).then(|| map_val(h.value_at_quantile(0.50))),
        p90: (count > 0).then(|| map_val(h.value_at_quantile(0.90))),
        p95: (count > 0).then(|| map_val(h.value_at_quantile(0.95))),
        p99: (count > 0).then(|| map_val(h.value_at_quantile(0.99))),
        min: (count > 0).then(|| map_val(h.min())),
        max: (count > 0).then(|| map_val(h.max())),
        mean: (count > 0).then(|| h.mean()),
        stdev: (count > 0).then(|| h.stdev()),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_histogram_empty_has_no_stats() {
        let h = new_default_histogram();
        let s = summarize_histogram(&h);
        assert_eq!(s.count, 0);
        assert!(s.p50.is_none());
        assert!(s.max.is_none());
        assert!(s.mean.is_none());
    }

    #[test]
    fn record_duration_uses_microseconds() {
        let mut h = new_default_histogram();
        record_duration(&mut h, Duration::from_millis(10));
        record_duration(&mut h, Duration::from_millis(20));
        record_duration(&mut h, Duration::ZERO);

        let s = summarize_histogram(&h);
        assert_eq!(s.count, 3);
        assert_eq!(s.min, Some(1.0));
        let max = s.max.unwrap_or_default();
        assert!((max - 20_000.0).abs() <= 20.0, "max={max}");

        let ms = s.as_millis();
        let max_ms = ms.max.unwrap_or_default();
        assert!((max_ms - 20.0).abs() <= 0.02, "max_ms={max_ms}");
    }
}
