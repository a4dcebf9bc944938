use anyhow::Context as _;

use speedalyze_core::SummaryBuilder;
use speedalyze_core::metrics::MetricSet;

use crate::cli::SummarizeArgs;
use crate::config;
use crate::exit_codes::ExitCode;
use crate::run::write_artifact;
use crate::run_error::RunError;

/// Builds the artifact from a k6 summary instead of a live run.
pub async fn summarize(args: SummarizeArgs) -> Result<ExitCode, RunError> {
    let cfg = config::load_config(args.config.as_deref())
        .await
        .map_err(RunError::InvalidInput)?;

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("failed to read k6 summary: {}", args.input.display()))
        .map_err(RunError::InvalidInput)?;
    let metrics = MetricSet::from_k6_summary_json(&raw)
        .with_context(|| format!("invalid k6 summary: {}", args.input.display()))
        .map_err(RunError::InvalidInput)?;

    tracing::debug!(
        series = metrics.len(),
        run_duration = ?metrics.run_duration(),
        "loaded k6 summary"
    );
    for key in metrics.keys() {
        tracing::debug!(key, "available metric");
    }

    let record = SummaryBuilder::for_scenario(&cfg.scenario).build(&metrics);
    write_artifact(&args.out, &record)
        .await
        .map_err(RunError::RuntimeError)?;

    println!("artifact: {}", args.out.display());
    Ok(ExitCode::Success)
}
