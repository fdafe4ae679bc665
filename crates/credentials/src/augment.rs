//! Request augmentation for the first page of a proxied request.
//!
//! Continuation pages are fetched from the URL upstream hands back in its
//! `Link` header, so nothing here is applied to them.

use crate::{Credentials, PER_PAGE};
use common::Secret;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use tracing::warn;

/// `Authorization: token <value>` for an access token, marked sensitive.
pub fn authorization_header(token: &Secret<String>) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut value = HeaderValue::from_str(&format!("token {}", token.expose()))?;
    value.set_sensitive(true);
    Ok(value)
}

impl Credentials {
    /// Add this mode's query parameters to `url` and headers to `headers`.
    ///
    /// - `ClientIdSecret`: `client_id`, `client_secret`, `per_page` query params
    /// - `AccessToken`: `Authorization: token <value>` and `per_page`
    /// - `None`: untouched
    pub fn apply(&self, url: &mut Url, headers: &mut HeaderMap) {
        match self {
            Credentials::ClientIdSecret { id, secret } => {
                url.query_pairs_mut()
                    .append_pair("client_id", id)
                    .append_pair("client_secret", secret.expose())
                    .append_pair("per_page", &PER_PAGE.to_string());
            }
            Credentials::AccessToken { token } => {
                match authorization_header(token) {
                    Ok(value) => {
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping access_token that is not a valid header value");
                    }
                }
                url.query_pairs_mut()
                    .append_pair("per_page", &PER_PAGE.to_string());
            }
            Credentials::None => {}
        }
    }
}
