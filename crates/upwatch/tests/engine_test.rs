//! End-to-end tests of the engine against a local HTTP fixture.

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use upwatch::{
    CheckDefinition, Engine, EngineConfig, HttpProbe, Notifier, NotifyError, Probe, ShellHookRunner,
    TargetStatus, ViewState,
};

#[derive(Clone, Default)]
struct Fixture {
    down: Arc<AtomicBool>,
}

async fn health(State(fixture): State<Fixture>) -> Response {
    if fixture.down.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
    }
    (
        StatusCode::OK,
        [(header::HeaderName::from_static("x-app"), "up")],
        "{\"status\":\"ok\"}",
    )
        .into_response()
}

async fn echo_query(axum::extract::RawQuery(query): axum::extract::RawQuery) -> String {
    query.unwrap_or_default()
}

/// Start the fixture server on an ephemeral port.
async fn start_fixture() -> (SocketAddr, Fixture) {
    let fixture = Fixture::default();
    let app = Router::new()
        .route("/health", get(health))
        .route("/moved", get(|| async { Redirect::temporary("/health") }))
        .route("/echo", get(echo_query))
        .with_state(fixture.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, fixture)
}

/// Keeps every delivered message.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

fn health_definition(addr: SocketAddr) -> CheckDefinition {
    let mut definition = CheckDefinition {
        name: "api".to_string(),
        source_path: "/specs/api.yaml".to_string(),
        url: format!("http://{addr}/health"),
        expect_status_code: Some(200),
        expect_body_contains: Some("\"ok\"".to_string()),
        timeout: Duration::from_secs(2),
        failure_threshold: 2,
        success_threshold: 1,
        ..CheckDefinition::default()
    };
    definition
        .expect_headers
        .insert("X-App".to_string(), "up".to_string());
    definition
}

#[tokio::test]
async fn test_probe_against_fixture() {
    let (addr, fixture) = start_fixture().await;
    let probe = HttpProbe::new(Arc::new(health_definition(addr))).unwrap();
    let cancel = CancellationToken::new();

    let outcome = probe.check(&cancel).await;
    assert!(outcome.is_success(), "unexpected failure: {:?}", outcome.error);
    assert_eq!(outcome.response_code, Some(200));

    fixture.down.store(true, Ordering::SeqCst);
    let outcome = probe.check(&cancel).await;
    assert_eq!(outcome.error.unwrap().class(), "status");
    assert_eq!(outcome.response_code, Some(503));
}

#[tokio::test]
async fn test_redirect_policy() {
    let (addr, _fixture) = start_fixture().await;

    let not_followed = HttpProbe::new(Arc::new(CheckDefinition {
        name: "moved".to_string(),
        url: format!("http://{addr}/moved"),
        expect_status_code: Some(307),
        ..CheckDefinition::default()
    }))
    .unwrap();
    let outcome = not_followed.check(&CancellationToken::new()).await;
    assert!(outcome.is_success(), "unexpected failure: {:?}", outcome.error);

    let followed = HttpProbe::new(Arc::new(CheckDefinition {
        name: "moved".to_string(),
        url: format!("http://{addr}/moved"),
        follow_redirects: true,
        expect_status_code: Some(200),
        ..CheckDefinition::default()
    }))
    .unwrap();
    let outcome = followed.check(&CancellationToken::new()).await;
    assert!(outcome.is_success(), "unexpected failure: {:?}", outcome.error);
}

#[tokio::test]
async fn test_query_args_reach_server() {
    let (addr, _fixture) = start_fixture().await;

    let mut definition = CheckDefinition {
        name: "echo".to_string(),
        url: format!("http://{addr}/echo?zone=eu&token=old"),
        expect_body_exact: Some("token=new&zone=eu".to_string()),
        ..CheckDefinition::default()
    };
    definition
        .extra_query_args
        .insert("token".to_string(), "new".to_string());

    let probe = HttpProbe::new(Arc::new(definition)).unwrap();
    let outcome = probe.check(&CancellationToken::new()).await;
    assert!(outcome.is_success(), "unexpected failure: {:?}", outcome.error);
}

#[tokio::test]
async fn test_engine_failure_and_recovery() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (addr, fixture) = start_fixture().await;
    let disabled = CheckDefinition {
        name: "legacy".to_string(),
        url: "http://127.0.0.1:1/".to_string(),
        disabled: true,
        ..CheckDefinition::default()
    };

    let notifier = Arc::new(RecordingNotifier::default());
    let engine = Engine::new(
        vec![health_definition(addr), disabled],
        EngineConfig::default(),
        Arc::new(ShellHookRunner::new()),
        Some(notifier.clone() as Arc<dyn Notifier>),
        vec!["ops@example.com".to_string(), "dev@example.com".to_string()],
    )
    .unwrap();
    let cancel = CancellationToken::new();

    let report = engine.scheduler().run_cycle(&cancel).await;
    assert_eq!(report.probed, 1);
    assert_eq!(report.failed, 0);

    fixture.down.store(true, Ordering::SeqCst);
    engine.scheduler().run_cycle(&cancel).await;
    let state = engine.store().get("api").unwrap();
    assert_eq!(state.status, TargetStatus::Healthy);
    assert_eq!(state.consecutive_failures, 1);

    let report = engine.scheduler().run_cycle(&cancel).await;
    assert_eq!(report.transitions, 1);
    assert_eq!(engine.store().get("api").unwrap().status, TargetStatus::Failing);

    let snapshot = engine.publisher().snapshot();
    assert_eq!(snapshot.spec_count, 2);
    assert_eq!(snapshot.failing_count(), 1);
    let legacy = snapshot.specs.iter().find(|s| s.name == "legacy").unwrap();
    assert!(legacy.disabled);
    assert_eq!(legacy.state, ViewState::Unknown);

    fixture.down.store(false, Ordering::SeqCst);
    let report = engine.scheduler().run_cycle(&cancel).await;
    assert_eq!(report.transitions, 1);
    assert_eq!(engine.store().get("api").unwrap().status, TargetStatus::Healthy);

    assert!(engine.shutdown(Duration::from_secs(5)).await);

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 4);
    let failures: Vec<_> = sent.iter().filter(|(_, subject, _)| subject == "upwatch failure").collect();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].2.contains("reason: unexpected status code: got 503, want 200"));
    assert_eq!(
        sent.iter().filter(|(_, subject, _)| subject == "upwatch recovery").count(),
        2
    );
}

#[tokio::test]
async fn test_status_stream_follows_rounds() {
    let (addr, _fixture) = start_fixture().await;
    let config = EngineConfig {
        stream_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = Engine::new(
        vec![health_definition(addr)],
        config,
        Arc::new(ShellHookRunner::new()),
        None,
        vec![],
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let mut stream = engine.publisher().subscribe(cancel.clone());

    let first = stream.next().await.unwrap();
    assert_eq!(first.specs[0].state, ViewState::Unknown);

    engine.scheduler().run_cycle(&cancel).await;
    let next = stream.next().await.unwrap();
    assert_eq!(next.specs[0].state, ViewState::Healthy);
    assert!(next.specs[0].has_state);

    cancel.cancel();
    assert!(stream.next().await.is_none());
}
