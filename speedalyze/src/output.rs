use crate::cli::OutputFormat;
use crate::config::RunConfig;
use std::path::Path;

use speedalyze_core::metrics::Aggregates;
use speedalyze_core::{ProgressFn, RunOutcome, SummaryRecord, ThresholdViolation};

mod human;
mod json;

/// Everything known once a run has finished.
pub(crate) struct RunReport<'a> {
    pub outcome: &'a RunOutcome,
    pub aggregates: &'a Aggregates,
    pub record: &'a SummaryRecord,
    pub violations: &'a [ThresholdViolation],
    pub artifact: &'a Path,
}

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, cfg: &RunConfig);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, report: &RunReport<'_>) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput::new()),
    }
}
