//! HTTP status surface: text and JSON snapshots, a live snapshot stream,
//! Prometheus metrics and a liveness probe.

use crate::config::HttpSettings;
use crate::metrics::MetricsRegistry;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use upwatch::StatusPublisher;

const AUTH_REALM: &str = "Basic realm=\"upwatch\"";

/// Credentials required on every route except `/healthz`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check an `Authorization` header value.
    pub fn accepts(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, pass)) => user == self.username && pass == self.password,
            None => false,
        }
    }
}

#[derive(Clone)]
struct AppState {
    publisher: StatusPublisher,
    metrics: Arc<MetricsRegistry>,
    auth: Option<Arc<BasicAuth>>,
    shutdown: CancellationToken,
}

/// HTTP server for the status endpoints
pub struct StatusServer {
    state: AppState,
    listen_addr: String,
}

impl StatusServer {
    /// Create a new status server. Open streams end when `shutdown` fires.
    pub fn new(
        publisher: StatusPublisher,
        metrics: Arc<MetricsRegistry>,
        settings: &HttpSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let auth = settings
            .basic_auth()
            .map(|(user, pass)| Arc::new(BasicAuth::new(user, pass)));

        Self {
            state: AppState {
                publisher,
                metrics,
                auth,
                shutdown,
            },
            listen_addr: settings.listen_addr(),
        }
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(text_handler))
            .route("/status", get(status_handler))
            .route("/events", get(events_handler))
            .route("/metrics", get(metrics_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                basic_auth_middleware,
            ))
            .route("/healthz", get(healthz_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let app = self.router();
        let shutdown = self.state.shutdown.clone();

        info!(
            listen_addr = %listener.local_addr()?,
            basic_auth = self.state.auth.is_some(),
            "Status server listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Status server stopped");
        Ok(())
    }
}

async fn basic_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(auth) = &state.auth else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|h| auth.accepts(h));

    if authorized {
        return next.run(request).await;
    }

    debug!(path = %request.uri().path(), "Rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM))],
        "unauthorized\n",
    )
        .into_response()
}

async fn text_handler(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.publisher.snapshot().to_string(),
    )
        .into_response()
}

async fn status_handler(State(state): State<AppState>) -> Response {
    Json(state.publisher.snapshot()).into_response()
}

/// Decrements the session gauge when the stream is dropped.
struct SessionGuard(Arc<MetricsRegistry>);

impl SessionGuard {
    fn open(metrics: Arc<MetricsRegistry>) -> Self {
        metrics.stream_opened();
        Self(metrics)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.stream_closed();
        debug!("Status stream session closed");
    }
}

async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let guard = SessionGuard::open(state.metrics.clone());
    let frames = state
        .publisher
        .subscribe(state.shutdown.child_token())
        .map(move |snapshot| {
            let _session = &guard;
            Event::default().event("status").json_data(&snapshot)
        });

    Sse::new(frames).keep_alive(KeepAlive::default())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.publisher.snapshot();
    match state.metrics.render(&snapshot) {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}
