use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde_json::Value;
use speedalyze_http::{HttpClient, HttpRequest, HttpResponse};
use speedalyze_metrics::{Collector, Operation, Sample};
use tracing::warn;

use crate::scheduler::{IterationContext, IterationOutcome, Workload};
use crate::{Error, Result};

const BODY_LOG_CHARS: usize = 256;

const CREATE_BODY: &[u8] = br#"{"name":"item","value":100}"#;
const UPDATE_BODY: &[u8] = br#"{"name":"item-upd","value":200}"#;

/// Status each operation must answer with to count as a success.
#[must_use]
pub fn expected_status(op: Operation) -> u16 {
    match op {
        Operation::Create => 201,
        Operation::Delete => 204,
        Operation::List | Operation::Detail | Operation::Update => 200,
    }
}

/// Runs the create → detail → update → delete → list transaction against an
/// `/items` service, one transaction per iteration.
///
/// Detail, update and delete need the id returned by create and are skipped
/// when create fails. List always runs.
#[derive(Debug, Clone)]
pub struct WorkflowExecutor {
    client: HttpClient,
    base_url: String,
    collector: Arc<Collector>,
    request_timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct VirtualUser {
    pub id: u64,
}

impl WorkflowExecutor {
    pub fn new(client: HttpClient, base_url: &str, collector: Arc<Collector>) -> Result<Self> {
        let parsed =
            url::Url::parse(base_url).map_err(|_| Error::InvalidBaseUrl(base_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collector,
            request_timeout: None,
        })
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Executes one iteration. Every request carries the same `ts` token.
    pub async fn run_iteration(&self, ctx: &IterationContext) -> IterationOutcome {
        let token = iteration_token(ctx.vu_id, ctx.iteration);
        let items = format!("{}/items", self.base_url);

        if ctx.is_interrupted() {
            return IterationOutcome::Interrupted;
        }
        let create = HttpRequest::post(
            format!("{items}?ts={token}"),
            Bytes::from_static(CREATE_BODY),
        );
        let id = self
            .step(Operation::Create, create)
            .await
            .as_ref()
            .and_then(created_id);

        if let Some(id) = id {
            let item = format!("{items}/{id}?ts={token}");

            if ctx.is_interrupted() {
                return IterationOutcome::Interrupted;
            }
            self.step(Operation::Detail, HttpRequest::get(item.as_str()))
                .await;

            if ctx.is_interrupted() {
                return IterationOutcome::Interrupted;
            }
            let update = HttpRequest::put(item.as_str(), Bytes::from_static(UPDATE_BODY));
            self.step(Operation::Update, update).await;

            if ctx.is_interrupted() {
                return IterationOutcome::Interrupted;
            }
            self.step(Operation::Delete, HttpRequest::delete(item)).await;
        }

        if ctx.is_interrupted() {
            return IterationOutcome::Interrupted;
        }
        self.step(Operation::List, HttpRequest::get(format!("{items}?ts={token}")))
            .await;

        IterationOutcome::Completed
    }

    /// Issues one request and records its sample. Returns the response when
    /// the operation succeeded.
    async fn step(&self, op: Operation, req: HttpRequest) -> Option<HttpResponse> {
        let mut req = req.with_header("content-type", "application/json");
        if let Some(timeout) = self.request_timeout {
            req = req.with_timeout(timeout);
        }

        let issued_at = SystemTime::now();
        let started = Instant::now();
        let res = self.client.request(req).await;
        let latency = started.elapsed();

        let expected = expected_status(op);
        let res = match res {
            Ok(res) if res.status == expected => Some(res),
            Ok(res) => {
                warn!(
                    operation = %op,
                    status = res.status,
                    expected,
                    body = %res.body_snippet(BODY_LOG_CHARS),
                    "unexpected status"
                );
                None
            }
            Err(err) => {
                warn!(
                    operation = %op,
                    kind = %err.transport_error_kind(),
                    error = %err,
                    "request failed"
                );
                None
            }
        };

        let res = match (res, op) {
            (Some(res), Operation::Create) if created_id(&res).is_none() => {
                warn!(
                    operation = %op,
                    body = %res.body_snippet(BODY_LOG_CHARS),
                    "created item has no id"
                );
                None
            }
            (res, _) => res,
        };

        self.collector
            .record(Sample::new(op, latency, res.is_some()).at(issued_at));
        res
    }
}

/// `<unix millis>-<vu>-<iteration>`, unique per iteration across VUs.
#[must_use]
pub fn iteration_token(vu_id: u64, iteration: u64) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{millis}-{vu_id}-{iteration}")
}

/// Id of a created item: a JSON number or non-empty string under `id`.
fn created_id(res: &HttpResponse) -> Option<String> {
    match res.json()?.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

impl Workload for WorkflowExecutor {
    type Vu = VirtualUser;
    type InitError = std::convert::Infallible;

    async fn init_vu(&self, vu_id: u64) -> std::result::Result<VirtualUser, Self::InitError> {
        Ok(VirtualUser { id: vu_id })
    }

    async fn iteration(&self, vu: &mut VirtualUser, ctx: &IterationContext) -> IterationOutcome {
        debug_assert_eq!(vu.id, ctx.vu_id);
        self.run_iteration(ctx).await
    }
}
