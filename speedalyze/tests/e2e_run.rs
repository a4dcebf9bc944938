use std::path::Path;
use std::process::Command;

use anyhow::Context as _;
use serde::Deserialize;
use serde_json::Value;
use speedalyze_testserver::{SEEDED_ITEMS, TestServer};

const LABELS: [&str; 5] = ["list", "detail", "create", "update", "delete"];

#[derive(Debug, Deserialize)]
struct ProgressLine {
    state: String,
    active_vus: u64,
    total_requests: u64,
}

#[derive(Debug, Deserialize)]
struct SummaryLine {
    peak_vus: u64,
    completed_iterations: u64,
    total_requests: u64,
    failed_requests: u64,
    thresholds_failed: usize,
    record: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum JsonLine {
    #[serde(rename = "progress")]
    Progress(ProgressLine),

    #[serde(rename = "summary")]
    Summary(SummaryLine),
}

fn numbers(v: &Value, pointer: &str) -> anyhow::Result<Vec<f64>> {
    v.pointer(pointer)
        .and_then(Value::as_array)
        .with_context(|| format!("missing array at {pointer}"))?
        .iter()
        .map(|n| n.as_f64().with_context(|| format!("non-number in {pointer}")))
        .collect()
}

#[tokio::test]
async fn e2e_run_writes_artifact_and_ndjson() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let base_url = server.base_url().to_string();

    let dir = tempfile::tempdir().context("tempdir")?;
    let artifact = dir.path().join("out").join("benchmark_results.json");
    let artifact_arg = artifact.clone();
    let config = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/short.yaml");
    let exe = env!("CARGO_BIN_EXE_speedalyze");

    let out = tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&config)
            .arg("--base-url")
            .arg(&base_url)
            .arg("--out")
            .arg(&artifact_arg)
            .arg("--output")
            .arg("json")
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run speedalyze binary")?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(
        out.status.success(),
        "expected success, got {:?}\nstdout:\n{stdout}\nstderr:\n{}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let lines: Vec<JsonLine> = stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<JsonLine>(l))
        .collect::<Result<_, _>>()
        .context("stdout should be NDJSON")?;

    let progress: Vec<&ProgressLine> = lines
        .iter()
        .filter_map(|l| match l {
            JsonLine::Progress(p) => Some(p),
            JsonLine::Summary(_) => None,
        })
        .collect();
    anyhow::ensure!(!progress.is_empty(), "expected at least one progress line");
    anyhow::ensure!(progress.iter().all(|p| p.active_vus <= 2));
    anyhow::ensure!(progress.iter().all(|p| !p.state.is_empty()));

    let Some(JsonLine::Summary(summary)) = lines.last() else {
        anyhow::bail!("last line should be the summary:\n{stdout}");
    };
    anyhow::ensure!(summary.peak_vus == 2);
    anyhow::ensure!(summary.completed_iterations > 0);
    anyhow::ensure!(summary.failed_requests == 0);
    anyhow::ensure!(summary.thresholds_failed == 0);
    anyhow::ensure!(summary.total_requests == server.stats().requests_total());
    anyhow::ensure!(progress.iter().all(|p| p.total_requests <= summary.total_requests));

    let raw = std::fs::read_to_string(&artifact).context("read artifact")?;
    let doc: Value = serde_json::from_str(&raw).context("artifact should be JSON")?;
    anyhow::ensure!(doc == summary.record, "artifact and summary record differ");

    for section in ["latency", "throughput", "errorRate"] {
        let labels = doc
            .pointer(&format!("/{section}/labels"))
            .cloned()
            .unwrap_or(Value::Null);
        anyhow::ensure!(labels == serde_json::json!(LABELS), "{section} labels: {labels}");
    }
    anyhow::ensure!(doc.pointer("/environment/endpoints") == Some(&serde_json::json!(LABELS)));
    anyhow::ensure!(doc.pointer("/environment/vus") == Some(&serde_json::json!(2)));
    anyhow::ensure!(
        doc.pointer("/environment/duration") == Some(&serde_json::json!("1s 500ms"))
    );

    let p50 = numbers(&doc, "/latency/p50")?;
    let p95 = numbers(&doc, "/latency/p95")?;
    let rps = numbers(&doc, "/throughput/rps")?;
    let rate = numbers(&doc, "/errorRate/rate")?;
    for i in 0..LABELS.len() {
        anyhow::ensure!(p50[i] > 0.0 && p95[i] >= p50[i], "{}: p50={} p95={}", LABELS[i], p50[i], p95[i]);
        anyhow::ensure!(rps[i] > 0.0, "{}: rps={}", LABELS[i], rps[i]);
        anyhow::ensure!(rate[i] == 0.0, "{}: error rate={}", LABELS[i], rate[i]);
    }

    anyhow::ensure!(server.item_count() == SEEDED_ITEMS as usize);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn e2e_run_against_dead_target_records_errors() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;
    let artifact = dir.path().join("results.json");
    let artifact_arg = artifact.clone();
    let config = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/short.yaml");
    let exe = env!("CARGO_BIN_EXE_speedalyze");

    let out = tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&config)
            .arg("--base-url")
            .arg("http://127.0.0.1:1")
            .arg("--request-timeout")
            .arg("500ms")
            .arg("--out")
            .arg(&artifact_arg)
            .arg("--output")
            .arg("json")
            .env("RUST_LOG", "error")
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run speedalyze binary")?;

    // The error-rate threshold fails; the run itself does not abort.
    anyhow::ensure!(
        out.status.code() == Some(11),
        "expected exit code 11, got {:?}\nstderr:\n{}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let doc: Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact).context("read artifact")?)
            .context("artifact should be JSON")?;
    let rate = numbers(&doc, "/errorRate/rate")?;
    // create and list fail on every iteration; the dependent steps never run.
    anyhow::ensure!(rate[0] == 1.0 && rate[2] == 1.0, "rates: {rate:?}");
    anyhow::ensure!(rate[1] == 0.0 && rate[3] == 0.0 && rate[4] == 0.0, "rates: {rate:?}");
    Ok(())
}
