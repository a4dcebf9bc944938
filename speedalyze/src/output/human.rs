use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_ms_opt, format_percent, format_rate};
use progress::HumanProgress;
use summary::render;

use speedalyze_core::{ProgressFn, ProgressUpdate};

use super::{OutputFormatter, RunReport};
use crate::config::RunConfig;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

fn progress_message(u: &ProgressUpdate) -> String {
    let latency = u.totals.latency.as_millis();
    let rates = format!(
        " vus={} iters/s={} rps={} errors={} p95={}",
        u.active_vus,
        format_rate(u.iterations_per_sec_now),
        format_rate(u.rps_now),
        format_percent(u.error_rate_now),
        format_ms_opt(latency.p95)
    );

    match &u.stage {
        Some(stage) => format!(
            "{} stage={}/{} target={} elapsed={} stage_remaining={}{}",
            u.state,
            stage.stage,
            stage.stages,
            stage.current_target,
            format_duration(u.elapsed),
            format_duration(stage.stage_remaining),
            rates
        ),
        None => format!("{} elapsed={}{}", u.state, format_duration(u.elapsed), rates),
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, cfg: &RunConfig) {
        let scenario = &cfg.scenario;
        println!("target: {}", cfg.base_url);
        println!(
            "schedule: {} stages, {} total, max {} vus, graceful ramp-down {} stop {}",
            scenario.stages().len(),
            humantime::format_duration(scenario.total_duration()),
            scenario.max_vus(),
            humantime::format_duration(scenario.ramp_down()),
            humantime::format_duration(scenario.stop())
        );
        println!("thresholds: {}", cfg.thresholds.len());
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u| {
            progress.update(u.total_duration, u.elapsed, progress_message(&u));
        }))
    }

    fn print_summary(&self, report: &RunReport<'_>) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));
        Ok(())
    }
}
