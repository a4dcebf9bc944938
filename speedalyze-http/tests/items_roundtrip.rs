use std::time::Duration;

use bytes::Bytes;
use speedalyze_http::{Error, HttpClient, HttpRequest};
use speedalyze_testserver::TestServer;

#[tokio::test]
async fn crud_requests_reach_the_item_service() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start testserver: {e}"));
    let base = server.base_url().to_string();
    let client = HttpClient::default();

    let created = client
        .request(
            HttpRequest::post(format!("{base}/items?ts=1"), Bytes::new())
                .with_header("content-type", "application/json")
                .with_json(&serde_json::json!({ "name": "item", "value": 100 }))
                .unwrap_or_else(|e| panic!("{e}")),
        )
        .await
        .unwrap_or_else(|e| panic!("create: {e}"));
    assert_eq!(created.status, 201);
    let id = created
        .json()
        .and_then(|v| v.get("id").and_then(serde_json::Value::as_i64))
        .unwrap_or_else(|| panic!("missing id in {:?}", created.body_snippet(256)));
    assert_eq!(id, 11);

    let detail = client
        .get(&format!("{base}/items/{id}"))
        .await
        .unwrap_or_else(|e| panic!("detail: {e}"));
    assert_eq!(detail.status, 200);

    let deleted = client
        .request(HttpRequest::delete(format!("{base}/items/{id}")))
        .await
        .unwrap_or_else(|e| panic!("delete: {e}"));
    assert_eq!(deleted.status, 204);
    assert!(deleted.body.is_empty());

    let missing = client
        .get(&format!("{base}/items/{id}"))
        .await
        .unwrap_or_else(|e| panic!("detail after delete: {e}"));
    assert_eq!(missing.status, 404);

    let bad_id = client
        .get(&format!("{base}/items/abc"))
        .await
        .unwrap_or_else(|e| panic!("bad id: {e}"));
    assert_eq!(bad_id.status, 400);

    let list = client
        .get(&format!("{base}/items"))
        .await
        .unwrap_or_else(|e| panic!("list: {e}"));
    assert_eq!(list.status, 200);
    let listed = list
        .json()
        .and_then(|v| v.as_array().map(Vec::len))
        .unwrap_or_default();
    assert_eq!(listed, 10);

    assert_eq!(server.stats().requests_total(), 6);
    assert_eq!(server.stats().saw_ts_query(), 1);
    assert_eq!(server.stats().saw_json_content_type(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn request_timeout_is_reported() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start testserver: {e}"));
    server.faults().set_delay(Duration::from_millis(500));

    let client = HttpClient::default();
    let res = client
        .request(
            HttpRequest::get(format!("{}/items", server.base_url()))
                .with_timeout(Duration::from_millis(50)),
        )
        .await;
    assert!(matches!(res, Err(Error::Timeout(_))));

    server.shutdown().await;
}
