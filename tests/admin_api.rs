//! Admin API against a live proxy state.

use std::net::SocketAddr;

use serde_json::Value;

mod common;

use common::{start_mock_backend, start_proxy, TestProxy};
use stateful_proxy::admin::setup_admin_router;
use stateful_proxy::config::{parse_config, watcher};

const CONFIG: &str = r#"
[admin]
api_key = "test-key"

[forwarders.base]
host = "127.0.0.1"
port = 9

[forwarders.api]
use_expression = "request.path.startsWith('/api')"

[[forwarders.api.state_apis]]
name = "auth"
url = "http://127.0.0.1:9/auth"

[forwarders.web]
"#;

async fn start_admin(proxy: &TestProxy) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = setup_admin_router(proxy.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn fetch(addr: SocketAddr, path: &str, key: Option<&str>) -> reqwest::Response {
    let mut request = reqwest::Client::new().get(format!("http://{addr}{path}"));
    if let Some(key) = key {
        request = request.bearer_auth(key);
    }
    request.send().await.unwrap()
}

#[tokio::test]
async fn requests_without_the_key_are_rejected() {
    let proxy = start_proxy(CONFIG).await;
    let admin = start_admin(&proxy).await;

    assert_eq!(fetch(admin, "/admin/status", None).await.status(), 401);
    assert_eq!(fetch(admin, "/admin/status", Some("wrong")).await.status(), 401);
    assert_eq!(fetch(admin, "/admin/status", Some("test-key")).await.status(), 200);
}

#[tokio::test]
async fn status_reports_forwarder_count() {
    let proxy = start_proxy(CONFIG).await;
    let admin = start_admin(&proxy).await;

    let body: Value = fetch(admin, "/admin/status", Some("test-key")).await.json().await.unwrap();
    assert_eq!(body["status"], "operational");
    assert_eq!(body["forwarders"], 2);
    assert_eq!(body["active_connections"], 0);
}

#[tokio::test]
async fn forwarders_are_listed_in_selection_order() {
    let proxy = start_proxy(CONFIG).await;
    let admin = start_admin(&proxy).await;

    let body: Value = fetch(admin, "/admin/forwarders", Some("test-key")).await.json().await.unwrap();
    let forwarders = body.as_array().unwrap();
    assert_eq!(forwarders.len(), 2);
    assert_eq!(forwarders[0]["name"], "api");
    assert_eq!(forwarders[0]["url"], "http://127.0.0.1:9");
    assert_eq!(forwarders[0]["state_apis"], serde_json::json!(["auth"]));
    assert_eq!(forwarders[1]["name"], "web");
}

#[tokio::test]
async fn reload_is_visible_to_admin_and_routing() {
    let (backend, captured) = start_mock_backend(common::http_response("200 OK", &[], "reloaded")).await;
    let proxy = start_proxy(CONFIG).await;
    let admin = start_admin(&proxy).await;

    let next = parse_config(
        &format!(
            r#"
            [forwarders.base]
            host = "127.0.0.1"
            port = {port}

            [forwarders.only]
            "#,
            port = backend.port()
        ),
        false,
    )
    .unwrap();
    assert_eq!(watcher::reload(proxy.state.table(), &next).unwrap(), 1);

    let body: Value = fetch(admin, "/admin/forwarders", Some("test-key")).await.json().await.unwrap();
    assert_eq!(body[0]["name"], "only");

    let response = common::get(proxy.addr, "/api/anything").await;
    assert!(response.ends_with("reloaded"), "{response}");
    assert_eq!(captured.count(), 1);
}
