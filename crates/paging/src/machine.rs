//! Pagination state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The caller (`UpstreamClient::fetch_all`) performs the HTTP fetch implied
//! by each action and feeds the outcome back in.
//!
//! ```text
//! Start --Begin--> FetchingPage --PageLoaded(next)--> FetchingPage
//!                       |  \--PageLoaded(no next / revisit)--> Done
//!                       \--FetchFailed------------> Failed
//! ```

use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::aggregate::Aggregate;
use crate::error::UpstreamError;

/// Pagination states. `Done` and `Failed` are terminal.
#[derive(Debug)]
pub enum PagingState {
    /// Nothing fetched yet. `origin` is the trusted API base.
    Start { origin: Url },
    /// Waiting for page `page` at `url`. `visited` holds every URL
    /// requested so far, `url` included.
    FetchingPage {
        origin: Url,
        url: Url,
        page: u32,
        aggregate: Option<Aggregate>,
        visited: HashSet<Url>,
    },
    /// All pages collected. `status` is the last page's status.
    Done {
        status: StatusCode,
        body: Value,
        pages: u32,
    },
    /// A page failed; everything collected so far is discarded.
    Failed(UpstreamError),
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum PagingEvent {
    /// Start the fetch at the (already credentialed) first-page URL
    Begin { url: Url },
    /// A page came back with a 2xx status
    PageLoaded {
        status: StatusCode,
        next: Option<String>,
        body: Bytes,
    },
    /// A page failed (non-2xx status or transport error)
    FetchFailed(UpstreamError),
}

/// Actions the caller should execute after a state transition.
#[derive(Debug)]
pub enum PagingAction {
    /// Fetch `url`. Page 1 carries credentials; later pages do not.
    Fetch { url: Url, page: u32 },
    /// Reached a terminal state
    Finish,
    /// No-op
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: PagingState, event: PagingEvent) -> (PagingState, PagingAction) {
    match (state, event) {
        // --- Start ---
        (PagingState::Start { origin }, PagingEvent::Begin { url }) => (
            PagingState::FetchingPage {
                origin,
                url: url.clone(),
                page: 1,
                aggregate: None,
                visited: HashSet::from([url.clone()]),
            },
            PagingAction::Fetch { url, page: 1 },
        ),

        // --- FetchingPage ---
        (
            PagingState::FetchingPage {
                origin,
                url,
                page,
                aggregate,
                mut visited,
            },
            PagingEvent::PageLoaded { status, next, body },
        ) => {
            let value = match decode_page(&body) {
                Ok(value) => value,
                Err(e) => {
                    return (
                        PagingState::Failed(UpstreamError::InvalidBody(e.to_string())),
                        PagingAction::Finish,
                    );
                }
            };

            let aggregate = match aggregate {
                None => Aggregate::seed(value),
                Some(mut aggregate) => {
                    aggregate.extend(value);
                    aggregate
                }
            };

            match next_page_url(&origin, &url, &aggregate, next.as_deref(), &visited) {
                Some(next_url) => {
                    visited.insert(next_url.clone());
                    debug!(page, items = aggregate.len(), next_path = next_url.path(), "following next link");
                    (
                        PagingState::FetchingPage {
                            origin,
                            url: next_url.clone(),
                            page: page + 1,
                            aggregate: Some(aggregate),
                            visited,
                        },
                        PagingAction::Fetch {
                            url: next_url,
                            page: page + 1,
                        },
                    )
                }
                None => (
                    PagingState::Done {
                        status,
                        body: aggregate.into_value(),
                        pages: page,
                    },
                    PagingAction::Finish,
                ),
            }
        }

        (PagingState::FetchingPage { .. }, PagingEvent::FetchFailed(err)) => {
            (PagingState::Failed(err), PagingAction::Finish)
        }

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, PagingAction::None),
    }
}

/// Decode a page body. An empty body decodes to `null`.
fn decode_page(body: &[u8]) -> serde_json::Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
}

/// Resolve the `next` link, if pagination should continue at all.
fn next_page_url(
    origin: &Url,
    current: &Url,
    aggregate: &Aggregate,
    next: Option<&str>,
    visited: &HashSet<Url>,
) -> Option<Url> {
    let next = next?;
    if !aggregate.is_list() {
        debug!("response is not a list; ignoring next link");
        return None;
    }
    let url = match current.join(next) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "unparseable next link; treating as last page");
            return None;
        }
    };
    if !same_origin(origin, &url) {
        warn!(
            next_host = url.host_str().unwrap_or_default(),
            upstream_host = origin.host_str().unwrap_or_default(),
            "next link points off the upstream host; not following"
        );
        return None;
    }
    if visited.contains(&url) {
        warn!(
            next_path = url.path(),
            pages = visited.len(),
            "next link points at a page already fetched; stopping"
        );
        return None;
    }
    Some(url)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}
