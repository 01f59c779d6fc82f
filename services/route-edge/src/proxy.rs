//! HTTP proxy logic
//!
//! Forwards requests the guard allowed to the upstream web app: strips
//! hop-by-hop headers, keeps path and query, and returns the upstream response
//! verbatim (including error statuses). Cookies pass through untouched so the
//! app sees the same session flags the guard did.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, instrument, warn};

use crate::metrics::record_upstream_error;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Largest request body the edge will buffer
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Upstream attempts for timeouts (two retries)
const MAX_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub timeout: Duration,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

/// Decrements the in-flight counter when the request finishes, however it ends.
struct InFlightGuard(Arc<AtomicU64>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// JSON error body: `{"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}`
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Proxy an inbound request to upstream. Timeouts are retried twice with a
/// fixed 100ms backoff; other failures are answered with 502 at once.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let _in_flight = InFlightGuard::enter(&state.in_flight);

    let method = request.method().clone();
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str()) && name != axum::http::header::HOST {
            headers.append(name.clone(), value.clone());
        }
    }

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = state
            .client
            .request(method.clone(), &upstream_url)
            .headers(headers.clone())
            .timeout(state.timeout)
            .body(body_bytes.clone())
            .send()
            .await;

        let upstream_response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() && attempt < MAX_ATTEMPTS => {
                warn!(attempt, "upstream timeout, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            Err(e) if e.is_timeout() => {
                state.errors_total.fetch_add(1, Ordering::Relaxed);
                record_upstream_error("timeout");
                error!(error = %e, attempts = MAX_ATTEMPTS, "upstream timeout after all retries");
                return error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    &format!(
                        "upstream timeout after {}ms ({MAX_ATTEMPTS} attempts)",
                        state.timeout.as_millis()
                    ),
                    request_id,
                );
            }
            Err(e) => {
                state.errors_total.fetch_add(1, Ordering::Relaxed);
                record_upstream_error(if e.is_connect() { "connection" } else { "other" });
                error!(error = %e, "upstream request failed");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {e}"),
                    request_id,
                );
            }
        };

        let status = upstream_response.status();
        let resp_headers = upstream_response.headers().clone();
        let resp_body = match upstream_response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                state.errors_total.fetch_add(1, Ordering::Relaxed);
                record_upstream_error("body");
                error!(error = %e, "failed to read upstream response body");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream response read error: {e}"),
                    request_id,
                );
            }
        };

        let mut response = Response::builder().status(status);
        for (name, value) in &resp_headers {
            if !is_hop_by_hop(name.as_str()) {
                response = response.header(name, value);
            }
        }
        return response
            .body(axum::body::Body::from(resp_body))
            .unwrap_or_else(|e| {
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("response build error: {e}"),
                    request_id,
                )
            });
    }
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
