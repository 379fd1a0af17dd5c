//! End-to-end tests: definitions on disk, a local target, the status server.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use upwatch_server::{Config, UpwatchServer, load_definitions};

async fn spawn_target() -> SocketAddr {
    let app = Router::new()
        .route("/up", get(|| async { "ok" }))
        .route("/down", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn write_specs(dir: &Path, target: SocketAddr) {
    std::fs::write(
        dir.join("services.yaml"),
        format!(
            "version: 1\nhttp:\n  name: up\n  url: http://{target}/up\n  expect:\n    code: 200\n\
             ---\n\
             version: 1\nhttp:\n  name: down\n  url: http://{target}/down\n  expect:\n    code: 200\n"
        ),
    )
    .unwrap();
    std::fs::create_dir_all(dir.join("legacy")).unwrap();
    std::fs::write(
        dir.join("legacy/old.yml"),
        format!("version: 1\nhttp:\n  name: old\n  disabled: true\n  url: http://{target}/up\n"),
    )
    .unwrap();
}

async fn fetch_json(client: &reqwest::Client, url: &str) -> serde_json::Value {
    let text = client.get(url).send().await.unwrap().text().await.unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_server_reports_target_states() {
    let target = spawn_target().await;
    let specs = tempfile::tempdir().unwrap();
    write_specs(specs.path(), target);

    let mut config = Config::default();
    config.monitor.spec_path = specs.path().display().to_string();
    config.monitor.shutdown_grace = Duration::from_millis(200);

    let definitions = load_definitions(&config.monitor.spec_path).unwrap();
    assert_eq!(definitions.len(), 3);

    let server = UpwatchServer::new(config, definitions, None).unwrap();
    assert_eq!(server.engine().scheduler().target_count(), 2);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

    let client = reqwest::Client::new();
    let mut status = serde_json::Value::Null;
    for _ in 0..50 {
        status = fetch_json(&client, &format!("{base}/status")).await;
        if status["specs"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|spec| spec["hasState"] == true)
            .count()
            == 2
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(status["specCount"], 3);
    let state_of = |name: &str| {
        status["specs"]
            .as_array()
            .unwrap()
            .iter()
            .find(|spec| spec["name"] == name)
            .map(|spec| spec["state"].clone())
            .unwrap()
    };
    assert_eq!(state_of("up"), "healthy");
    assert_eq!(state_of("down"), "failing");
    assert_eq!(state_of("old"), "unknown");

    let metrics = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("upwatch_targets 3"));
    assert!(metrics.contains("upwatch_targets_failing 1"));
    assert!(metrics.contains("upwatch_target_state{target=\"down\"} 2"));

    let health = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn test_basic_auth_protects_status() {
    let mut config = Config::default();
    config.http.basic_auth_username = Some("admin".to_string());
    config.http.basic_auth_password = Some("s3cret".to_string());

    let server = UpwatchServer::new(config, vec![], None).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

    let client = reqwest::Client::new();
    let denied = client.get(format!("{base}/status")).send().await.unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

    let allowed = client
        .get(format!("{base}/status"))
        .basic_auth("admin", Some("s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), reqwest::StatusCode::OK);

    let health = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.unwrap().unwrap().is_ok());
}

#[test]
fn test_missing_spec_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(load_definitions(&missing.display().to_string()).is_err());
}
