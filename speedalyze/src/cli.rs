use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ARTIFACT_PATH: &str = "benchmark_results.json";

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable progress and summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "speedalyze",
    author,
    version,
    about = "CRUD load-testing harness for web framework benchmarks",
    long_about = "speedalyze drives an HTTP service exposing an `/items` CRUD API through a create -> detail -> update -> delete -> list workflow under a ramping virtual-user schedule, checks latency and error thresholds, and writes a normalized benchmark artifact.\n\nWithout a config file the reference 13-stage, 9m20s schedule and the reference thresholds are used.",
    after_help = "Examples:\n  speedalyze run --base-url http://localhost:8080\n  speedalyze run bench.yaml --out results/gin.json --output json\n  speedalyze summarize k6-summary.json --out benchmark_results.json\n  speedalyze export-config --out bench.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the benchmark workflow against a target service
    #[command(
        long_about = "Run the CRUD workflow with the configured stage schedule.\n\nCLI flags override values from the config file."
    )]
    Run(RunArgs),

    /// Convert a k6 summary export into a benchmark artifact
    Summarize(SummarizeArgs),

    /// Write the resolved configuration as YAML
    ExportConfig(ExportConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to a YAML config (defaults to the reference schedule)
    pub config: Option<PathBuf>,

    /// Target service base url (e.g. http://localhost:8080)
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Per-request timeout (e.g. 10s, 250ms)
    #[arg(long, value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Where to write the benchmark artifact
    #[arg(long, default_value = DEFAULT_ARTIFACT_PATH)]
    pub out: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct SummarizeArgs {
    /// k6 summary JSON (`--summary-export` or `handleSummary` shape)
    pub input: PathBuf,

    /// YAML config describing the run that produced the summary
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where to write the benchmark artifact
    #[arg(long, default_value = DEFAULT_ARTIFACT_PATH)]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct ExportConfigArgs {
    /// YAML config to resolve (defaults to the reference schedule)
    pub config: Option<PathBuf>,

    /// Override the target base url
    #[arg(long)]
    pub base_url: Option<String>,

    /// Output YAML path
    #[arg(long)]
    pub out: PathBuf,
}
