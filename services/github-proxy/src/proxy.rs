//! HTTP proxy logic
//!
//! Receives an inbound GET, selects credentials, fetches every upstream page
//! and answers with the concatenated JSON. Upstream error statuses and
//! bodies are relayed verbatim; failures without an upstream response get
//! a JSON `proxy_error` body.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use credentials::CredentialSettings;
use paging::{UpstreamClient, UpstreamError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub upstream: UpstreamClient,
    pub credentials: Arc<CredentialSettings>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

/// JSON error response: {"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Decrements the in-flight gauge even if the handler future is dropped
/// because the inbound client went away.
struct InFlight(Arc<AtomicU64>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Proxy `path` (relative to the upstream API base) with pagination.
///
/// Never fails: every upstream failure becomes a status + body pair.
#[instrument(skip_all, fields(request_id = %request_id, path = %path))]
pub async fn proxy_request(state: &ProxyState, path: &str, request_id: String) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = InFlight::enter(&state.in_flight);
    let started = Instant::now();

    let credentials = credentials::select(&state.credentials);

    let response = match state.upstream.fetch_all(path, &credentials).await {
        Ok(collected) => {
            crate::metrics::record_pages(collected.pages);
            if matches!(
                collected.status,
                StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT
            ) {
                // Bodyless statuses: no JSON, no content type
                info!(status = %collected.status, pages = collected.pages, "proxied");
                return finish(collected.status.into_response(), started);
            }
            match serde_json::to_vec(&collected.body) {
                Ok(body) => {
                    info!(status = %collected.status, pages = collected.pages, "proxied");
                    (
                        collected.status,
                        [(CONTENT_TYPE, "application/json")],
                        body,
                    )
                        .into_response()
                }
                Err(e) => {
                    state.errors_total.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "failed to serialize aggregated result");
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &format!("response serialization error: {e}"),
                        &request_id,
                    )
                }
            }
        }
        Err(err) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_upstream_error(err.kind());
            upstream_error_response(err, &request_id)
        }
    };

    finish(response, started)
}

fn finish(response: Response, started: Instant) -> Response {
    crate::metrics::record_request(response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// Map an upstream failure to the inbound response.
fn upstream_error_response(err: UpstreamError, request_id: &str) -> Response {
    match err {
        UpstreamError::Status {
            status,
            body,
            content_type,
        } => {
            warn!(%status, "upstream error relayed to client");
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            if let Some(content_type) = content_type {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            response
        }
        other => {
            error!(error = %other, kind = other.kind(), "upstream request failed");
            error_response(other.status(), &other.to_string(), request_id)
        }
    }
}

/// Scheme, host and port of the upstream for the health endpoint.
/// The path is left out.
pub fn upstream_label(upstream: &UpstreamClient) -> String {
    let base = upstream.api_base();
    match (base.host_str(), base.port()) {
        (Some(host), Some(port)) => format!("{}://{host}:{port}", base.scheme()),
        (Some(host), None) => format!("{}://{host}", base.scheme()),
        _ => base.scheme().to_string(),
    }
}
