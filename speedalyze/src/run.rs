use anyhow::Context as _;
use std::path::Path;
use std::sync::Arc;

use speedalyze_core::metrics::{Collector, MetricSet};
use speedalyze_core::{
    Scheduler, SummaryBuilder, SummaryRecord, ThresholdViolation, WorkflowExecutor,
    evaluate_thresholds,
};
use speedalyze_http::HttpClient;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::config::{self, RunConfig};
use crate::exit_codes::ExitCode;
use crate::output::{self, RunReport};
use crate::run_error::{RunError, classify_core_error};

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let cfg = resolve_config(&args).await?;

    let collector = Arc::new(Collector::new());
    let mut executor = WorkflowExecutor::new(HttpClient::default(), &cfg.base_url, collector.clone())
        .map_err(classify_core_error)?;
    if let Some(timeout) = cfg.request_timeout {
        executor = executor.with_request_timeout(timeout);
    }

    out.print_header(&cfg);

    let mut scheduler = Scheduler::new();
    if let Some(progress) = out.progress() {
        scheduler = scheduler.with_progress(progress);
    }

    let stop = scheduler.stop_signal();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the graceful window");
            stop.raise();
        }
    });

    info!(base_url = %cfg.base_url, "starting benchmark");
    let run_result = scheduler
        .start(&cfg.scenario, Arc::new(executor), collector.clone())
        .await;
    ctrl_c.abort();
    let outcome = run_result.map_err(classify_core_error)?;

    let snapshot = collector.snapshot();
    let aggregates = snapshot.aggregates();
    let metrics = MetricSet::from_snapshot(&snapshot, Some(outcome.duration));
    let record = SummaryBuilder::for_scenario(&cfg.scenario).build(&metrics);

    // Written even when thresholds fail.
    write_artifact(&args.out, &record)
        .await
        .map_err(RunError::RuntimeError)?;

    let violations =
        evaluate_thresholds(&aggregates, &cfg.thresholds).map_err(classify_core_error)?;
    log_threshold_violations(&violations);

    out.print_summary(&RunReport {
        outcome: &outcome,
        aggregates: &aggregates,
        record: &record,
        violations: &violations,
        artifact: &args.out,
    })
    .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_thresholds(violations.len()))
}

async fn resolve_config(args: &RunArgs) -> Result<RunConfig, RunError> {
    let mut cfg = config::load_config(args.config.as_deref())
        .await
        .map_err(RunError::InvalidInput)?;

    if let Some(base_url) = &args.base_url {
        cfg.base_url = base_url.clone();
    }
    if let Some(timeout) = args.request_timeout {
        cfg.request_timeout = Some(timeout);
    }

    Ok(cfg)
}

/// Pretty JSON with a trailing newline; parent directories are created.
pub(crate) async fn write_artifact(path: &Path, record: &SummaryRecord) -> anyhow::Result<()> {
    let mut json = record
        .to_json_pretty()
        .context("failed to serialize benchmark artifact")?;
    json.push('\n');
    config::write_file(path, json).await?;

    info!(path = %path.display(), "benchmark artifact written");
    Ok(())
}

fn log_threshold_violations(violations: &[ThresholdViolation]) {
    for v in violations {
        match v.observed {
            Some(observed) => warn!(
                metric = %v.metric,
                expression = %v.expression,
                observed,
                "threshold failed"
            ),
            None => warn!(
                metric = %v.metric,
                expression = %v.expression,
                "threshold failed (no data)"
            ),
        }
    }
}
