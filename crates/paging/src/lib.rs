//! Link-header pagination for proxied GitHub API reads
//!
//! GitHub splits list responses into pages and advertises the next one in a
//! `Link: <url>; rel="next"` header. This crate fetches page 1 with the
//! selected credentials, follows `next` links until they run out, and
//! concatenates the JSON arrays into one result. Any upstream failure aborts
//! the whole fetch: there are no partial results.
//!
//! - `link` parses the `Link` header
//! - `aggregate` concatenates page bodies
//! - `machine` is the pure pagination state machine
//! - `client` executes it over reqwest

mod aggregate;
mod client;
mod error;
mod link;
mod machine;

pub use aggregate::Aggregate;
pub use client::{Collected, DEFAULT_USER_AGENT, UpstreamClient};
pub use error::UpstreamError;
pub use link::{next_link, parse_link_header};
pub use machine::{PagingAction, PagingEvent, PagingState, handle_event};
