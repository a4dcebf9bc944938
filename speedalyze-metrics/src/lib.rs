pub mod agg;
pub mod collector;
pub mod error;
pub mod key;
pub mod metrics;
pub mod operation;
pub mod sample;
pub mod set;

pub use agg::{Aggregate, Aggregates, RunningStats, percentile, per_sec};
pub use collector::{Collector, LiveTotals, Snapshot};
pub use error::{Error, Result};
pub use key::{MetricKey, TagEncoding};
pub use metrics::HistogramSummary;
pub use operation::Operation;
pub use sample::Sample;
pub use set::{MetricSet, SeriesValues, latency_key};
