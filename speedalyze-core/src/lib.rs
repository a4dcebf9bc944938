mod config;
mod error;
mod progress;
mod schedule;
mod scheduler;
mod summary;
mod thresholds;
mod workflow;

pub use config::{DEFAULT_GRACEFUL_WINDOW, Scenario, Stage};
pub use error::{Error, Result};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use schedule::{Phase, StageSchedule, StageSnapshot};
pub use scheduler::{
    IterationContext, IterationOutcome, RunOutcome, Scheduler, SchedulerState, Signal, Workload,
};
pub use summary::{
    Environment, ErrorRateSummary, FALLBACK_RUN_DURATION, LatencySummary, SummaryBuilder,
    SummaryRecord, ThroughputSummary,
};
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet, ThresholdViolation,
    default_thresholds, evaluate_thresholds, parse_threshold_expr, validate_thresholds,
};
pub use workflow::{VirtualUser, WorkflowExecutor, expected_status, iteration_token};

pub use speedalyze_metrics as metrics;
