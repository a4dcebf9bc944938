//! In-memory `/items` CRUD service used as a load target in tests and local
//! smoke runs. Mirrors the benchmarked servers: ten seeded items, JSON bodies,
//! 201 on create, 204 on delete, 404 for unknown ids, 400 for malformed input.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_ITEMS: &str = "/items";
pub const PATH_ITEM: &str = "/items/{id}";

pub const SEEDED_ITEMS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Deserialize)]
struct ItemInput {
    name: String,
    value: i64,
}

#[derive(Debug)]
struct ItemStore {
    items: RwLock<BTreeMap<i64, Item>>,
    next_id: AtomicI64,
}

impl ItemStore {
    fn seeded() -> Self {
        let items = (1..=SEEDED_ITEMS)
            .map(|id| {
                let item = Item {
                    id,
                    name: format!("item-{id}"),
                    value: id * 10,
                };
                (id, item)
            })
            .collect();
        Self {
            items: RwLock::new(items),
            next_id: AtomicI64::new(SEEDED_ITEMS),
        }
    }

    fn create(&self, input: ItemInput) -> Item {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let item = Item {
            id,
            name: input.name,
            value: input.value,
        };
        self.items.write().insert(id, item.clone());
        item
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    creates: Arc<AtomicU64>,
    details: Arc<AtomicU64>,
    updates: Arc<AtomicU64>,
    deletes: Arc<AtomicU64>,
    lists: Arc<AtomicU64>,
    saw_json_content_type: Arc<AtomicU64>,
    saw_ts_query: Arc<AtomicU64>,
}

impl TestServerStats {
    fn observe(&self, route: &AtomicU64, headers: &HeaderMap, query: &HashMap<String, String>) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        route.fetch_add(1, Ordering::Relaxed);

        if headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("application/json"))
        {
            self.saw_json_content_type.fetch_add(1, Ordering::Relaxed);
        }
        if query.get("ts").is_some_and(|v| !v.is_empty()) {
            self.saw_ts_query.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn details(&self) -> u64 {
        self.details.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn lists(&self) -> u64 {
        self.lists.load(Ordering::Relaxed)
    }

    pub fn saw_json_content_type(&self) -> u64 {
        self.saw_json_content_type.load(Ordering::Relaxed)
    }

    pub fn saw_ts_query(&self) -> u64 {
        self.saw_ts_query.load(Ordering::Relaxed)
    }
}

/// Runtime-togglable misbehavior.
#[derive(Debug, Clone, Default)]
pub struct TestServerFaults {
    fail_creates: Arc<AtomicBool>,
    omit_created_id: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
}

impl TestServerFaults {
    /// Answer every create with 500.
    pub fn set_fail_creates(&self, on: bool) {
        self.fail_creates.store(on, Ordering::Relaxed);
    }

    /// Answer creates with 201 but leave `id` out of the body.
    pub fn set_omit_created_id(&self, on: bool) {
        self.omit_created_id.store(on, Ordering::Relaxed);
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(ms, Ordering::Relaxed);
    }

    async fn apply_delay(&self) {
        let ms = self.delay_ms.load(Ordering::Relaxed);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[derive(Debug, Clone)]
struct AppState {
    store: Arc<ItemStore>,
    stats: TestServerStats,
    faults: TestServerFaults,
}

type Params = Query<HashMap<String, String>>;

fn error_body(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
}

fn parse_id(raw: &str) -> Result<i64, Response> {
    raw.parse::<i64>()
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "invalid id"))
}

fn parse_input(body: &Bytes) -> Result<ItemInput, Response> {
    serde_json::from_slice(body).map_err(|e| error_body(StatusCode::BAD_REQUEST, &e.to_string()))
}

async fn handle_list(State(app): State<AppState>, headers: HeaderMap, Query(q): Params) -> Response {
    app.stats.observe(&app.stats.lists, &headers, &q);
    app.faults.apply_delay().await;

    let items: Vec<Item> = app.store.items.read().values().cloned().collect();
    (StatusCode::OK, Json(items)).into_response()
}

async fn handle_create(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(q): Params,
    body: Bytes,
) -> Response {
    app.stats.observe(&app.stats.creates, &headers, &q);
    app.faults.apply_delay().await;

    if app.faults.fail_creates.load(Ordering::Relaxed) {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, "create disabled");
    }
    let input = match parse_input(&body) {
        Ok(v) => v,
        Err(res) => return res,
    };
    let item = app.store.create(input);

    if app.faults.omit_created_id.load(Ordering::Relaxed) {
        let body = serde_json::json!({ "name": item.name, "value": item.value });
        return (StatusCode::CREATED, Json(body)).into_response();
    }
    (StatusCode::CREATED, Json(item)).into_response()
}

async fn handle_detail(
    State(app): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(q): Params,
) -> Response {
    app.stats.observe(&app.stats.details, &headers, &q);
    app.faults.apply_delay().await;

    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    match app.store.items.read().get(&id) {
        Some(item) => (StatusCode::OK, Json(item.clone())).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "item not found"),
    }
}

async fn handle_update(
    State(app): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(q): Params,
    body: Bytes,
) -> Response {
    app.stats.observe(&app.stats.updates, &headers, &q);
    app.faults.apply_delay().await;

    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    let input = match parse_input(&body) {
        Ok(v) => v,
        Err(res) => return res,
    };

    let mut items = app.store.items.write();
    let Some(slot) = items.get_mut(&id) else {
        return error_body(StatusCode::NOT_FOUND, "item not found");
    };
    *slot = Item {
        id,
        name: input.name,
        value: input.value,
    };
    (StatusCode::OK, Json(slot.clone())).into_response()
}

async fn handle_delete(
    State(app): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(q): Params,
) -> Response {
    app.stats.observe(&app.stats.deletes, &headers, &q);
    app.faults.apply_delay().await;

    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    match app.store.items.write().remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error_body(StatusCode::NOT_FOUND, "item not found"),
    }
}

fn router(app: AppState) -> Router {
    Router::new()
        .route(PATH_ITEMS, get(handle_list).post(handle_create))
        .route(
            PATH_ITEM,
            get(handle_detail).put(handle_update).delete(handle_delete),
        )
        .with_state(app)
}

/// Everything needed to serve the app; shared between [`TestServer`] and the
/// standalone binary.
#[derive(Debug, Clone)]
pub struct TestServerApp {
    state: AppState,
}

impl Default for TestServerApp {
    fn default() -> Self {
        Self {
            state: AppState {
                store: Arc::new(ItemStore::seeded()),
                stats: TestServerStats::default(),
                faults: TestServerFaults::default(),
            },
        }
    }
}

impl TestServerApp {
    pub fn stats(&self) -> &TestServerStats {
        &self.state.stats
    }

    pub fn faults(&self) -> &TestServerFaults {
        &self.state.faults
    }

    pub fn item_count(&self) -> usize {
        self.state.store.len()
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    app: TestServerApp,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = TestServerApp::default();
        let router = app.router();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            app,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        self.app.stats()
    }

    pub fn faults(&self) -> &TestServerFaults {
        self.app.faults()
    }

    pub fn item_count(&self) -> usize {
        self.app.item_count()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
