//! Condo route edge
//!
//! Single-binary service in front of the condominium web app that:
//! 1. Reads the session flag cookies off each navigation
//! 2. Runs the route guard (login redirect, home redirect, onboarding hold)
//! 3. Proxies allowed requests to the upstream app
//!
//! The guard only ever sees the presence and registration flags; tokens stay
//! between the browser session and the API.

mod config;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use session_auth::{AuthSignal, GuardDecision, RouteGuard};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::metrics::ServiceMetrics;
use crate::proxy::ProxyState;

/// How long in-flight requests get to finish after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    guard: Arc<RouteGuard>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(edge_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting condo-route-edge");

    // Install before anything emits metrics
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.edge.listen_addr,
        upstream_url = %config.edge.upstream_url,
        login_path = %config.routes.login_path,
        public_paths = config.routes.public_paths.len(),
        "configuration loaded"
    );

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        proxy: ProxyState {
            client: reqwest::Client::new(),
            upstream_url: config.edge.upstream_url.clone(),
            timeout: Duration::from_secs(config.edge.timeout_secs),
            errors_total: metrics.errors_total.clone(),
            in_flight: metrics.in_flight.clone(),
        },
        guard: Arc::new(RouteGuard::new(config.routes)),
        metrics: metrics.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.edge.max_connections);

    let listen_addr = config.edge.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => {
            warn!(
                remaining = metrics.in_flight.load(Ordering::Relaxed),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, uptime and request counters as JSON.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "upstream": state.proxy.upstream_url,
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all: guard navigations, proxy everything that is allowed.
async fn edge_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let started = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().clone();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = match guard_navigation(&state.guard, &request) {
        Some(redirect) => redirect,
        None => proxy::proxy_request(&state.proxy, request, &request_id).await,
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Run the guard on page navigations (GET/HEAD). Returns the redirect to send,
/// or `None` to let the request through.
fn guard_navigation(
    guard: &RouteGuard,
    request: &axum::http::Request<axum::body::Body>,
) -> Option<Response> {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return None;
    }

    let uri = request.uri();
    let signal = AuthSignal::from_cookie_header(&cookie_header(request.headers()));
    match guard.decide(uri.path(), uri.query(), &signal) {
        GuardDecision::Allow => None,
        GuardDecision::Redirect { location, reason } => {
            metrics::record_guard_redirect(reason.as_str());
            debug!(
                path = %uri.path(),
                location = %location,
                reason = reason.as_str(),
                authenticated = signal.authenticated,
                "guard redirect"
            );
            Some(Redirect::temporary(&location).into_response())
        }
    }
}

/// All `Cookie` headers joined into one value.
fn cookie_header(headers: &HeaderMap) -> String {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use session_auth::RouteGuardConfig;
    use tower::ServiceExt;

    /// A handle without installing the global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn test_app_state(upstream_url: &str, routes: RouteGuardConfig) -> AppState {
        let metrics = ServiceMetrics::new();
        AppState {
            proxy: ProxyState {
                client: reqwest::Client::new(),
                upstream_url: upstream_url.to_string(),
                timeout: Duration::from_secs(5),
                errors_total: metrics.errors_total.clone(),
                in_flight: metrics.in_flight.clone(),
            },
            guard: Arc::new(RouteGuard::new(routes)),
            metrics,
            prometheus: test_prometheus_handle(),
        }
    }

    /// Mock upstream that echoes method, path, query and cookies as JSON.
    async fn start_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().fallback(|request: Request<Body>| async move {
            let cookie = request
                .headers()
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = serde_json::json!({
                "method": request.method().to_string(),
                "path": request.uri().path(),
                "query": request.uri().query().unwrap_or(""),
                "cookie": cookie,
            });
            (StatusCode::OK, [("x-upstream-echo", "true")], axum::Json(body))
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let state = test_app_state("http://unused", RouteGuardConfig::default());
        state.metrics.requests_total.fetch_add(5, Ordering::Relaxed);

        let response = build_router(state, 1000)
            .oneshot(get("/health", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["requests_served"], 5);
        assert_eq!(json["upstream"], "http://unused");
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let state = test_app_state("http://unused", RouteGuardConfig::default());
        let response = build_router(state, 1000)
            .oneshot(get("/metrics", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn anonymous_navigation_is_redirected_to_login() {
        // Unreachable upstream: a proxied request would come back as 502.
        let state = test_app_state("http://127.0.0.1:1", RouteGuardConfig::default());
        let response = build_router(state, 1000)
            .oneshot(get("/dashboard?tab=fees", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/login?redirect=%2Fdashboard%3Ftab%3Dfees"
        );
    }

    #[tokio::test]
    async fn signed_in_navigation_is_proxied_with_cookies() {
        let upstream = start_echo_server().await;
        let state = test_app_state(&upstream, RouteGuardConfig::default());

        let response = build_router(state, 1000)
            .oneshot(get(
                "/units/12?view=ledger",
                Some("is_authenticated=true; is_user_registered=true"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-upstream-echo"], "true");
        let json = json_body(response).await;
        assert_eq!(json["path"], "/units/12");
        assert_eq!(json["query"], "view=ledger");
        assert_eq!(
            json["cookie"],
            "is_authenticated=true; is_user_registered=true"
        );
    }

    #[tokio::test]
    async fn signed_in_user_is_sent_home_from_login() {
        let state = test_app_state("http://127.0.0.1:1", RouteGuardConfig::default());
        let response = build_router(state, 1000)
            .oneshot(get("/login", Some("is_authenticated=true")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/dashboard");
    }

    #[tokio::test]
    async fn unregistered_user_is_held_on_completion_page() {
        let routes = RouteGuardConfig {
            completion_path: Some("/complete-profile".into()),
            ..RouteGuardConfig::default()
        };
        let state = test_app_state("http://127.0.0.1:1", routes);
        let response = build_router(state, 1000)
            .oneshot(get(
                "/dashboard",
                Some("is_authenticated=true; is_user_registered=false"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/complete-profile");
    }

    #[tokio::test]
    async fn public_pages_and_assets_pass_through_anonymously() {
        let upstream = start_echo_server().await;
        let state = test_app_state(&upstream, RouteGuardConfig::default());
        let app = build_router(state, 1000);

        for uri in ["/login", "/", "/_next/static/chunk.js", "/favicon.ico"] {
            let response = app.clone().oneshot(get(uri, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn non_navigation_requests_skip_the_guard() {
        let upstream = start_echo_server().await;
        let state = test_app_state(&upstream, RouteGuardConfig::default());

        let response = build_router(state, 1000)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/dashboard/actions")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["method"], "POST");
    }

    #[tokio::test]
    async fn dead_upstream_returns_502() {
        let state = test_app_state("http://127.0.0.1:1", RouteGuardConfig::default());
        let errors = state.metrics.errors_total.clone();
        let response = build_router(state, 1000)
            .oneshot(get("/login", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = json_body(response).await;
        assert_eq!(json["error"]["type"], "proxy_error");
        assert!(
            json["error"]["request_id"]
                .as_str()
                .unwrap()
                .starts_with("req_")
        );
        assert_eq!(errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn cookie_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, "is_authenticated=true".parse().unwrap());
        headers.append(header::COOKIE, "is_user_registered=false".parse().unwrap());
        let signal = AuthSignal::from_cookie_header(&cookie_header(&headers));
        assert!(signal.authenticated);
        assert_eq!(signal.registered, Some(false));
    }
}
