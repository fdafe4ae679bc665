//! Upstream failure taxonomy

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use std::time::Duration;
use thiserror::Error;

/// Terminal failure of a paginated fetch.
///
/// `Status` carries the upstream's own response so the caller can relay it
/// verbatim. The other variants have no upstream body; the caller
/// synthesizes one.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream returned {status}")]
    Status {
        status: StatusCode,
        body: Bytes,
        content_type: Option<HeaderValue>,
    },

    #[error("upstream timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("upstream error: {0}")]
    Transport(String),

    #[error("upstream returned a non-JSON page: {0}")]
    InvalidBody(String),

    #[error("pagination ended unexpectedly: {0}")]
    Internal(String),
}

impl UpstreamError {
    /// Status code to answer the inbound request with.
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Status { status, .. } => *status,
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Transport(_) | UpstreamError::InvalidBody(_) => StatusCode::BAD_GATEWAY,
            UpstreamError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for the `proxy_upstream_errors_total` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Status { .. } => "status",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Transport(_) => "connection",
            UpstreamError::InvalidBody(_) => "invalid_body",
            UpstreamError::Internal(_) => "internal",
        }
    }

    /// Classify a reqwest send/read failure.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return UpstreamError::Timeout(timeout);
        }
        // reqwest's Display stops at "error sending request"; the cause
        // (connection refused, DNS failure) lives in the source chain.
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        UpstreamError::Transport(message)
    }
}
