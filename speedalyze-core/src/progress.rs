use std::time::Duration;

use speedalyze_metrics::LiveTotals;

use crate::scheduler::SchedulerState;

#[derive(Debug, Clone)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub state: SchedulerState,
    pub stage: Option<StageProgress>,
    pub active_vus: u64,

    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,
    /// Failed requests / total requests during the last progress interval (0..=1).
    pub error_rate_now: f64,
    pub iterations_per_sec_now: f64,

    /// Totals since the start of the run. Latency is in microseconds.
    pub totals: LiveTotals,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
