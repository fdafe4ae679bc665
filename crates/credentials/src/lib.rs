//! Credential selection for upstream GitHub API requests
//!
//! The proxy holds the credentials so browser clients never see them. Three
//! strategies are mutually exclusive, chosen by precedence:
//!
//! 1. `client_id` + `client_secret` (OAuth app), sent as query parameters
//! 2. `access_token`, sent as `Authorization: token <value>`
//! 3. none, which GitHub rate-limits aggressively
//!
//! `select` is a pure decision over a `CredentialSettings` snapshot; the
//! resulting `Credentials` know how to augment the first outbound request
//! (see [`Credentials::apply`]).

mod augment;

pub use augment::authorization_header;

use common::Secret;
use tracing::{info, warn};

/// Page size requested from upstream whenever credentials are present.
pub const PER_PAGE: u32 = 100;

/// Immutable snapshot of the configured credentials.
///
/// Empty strings mean "unset". Loaded once at startup and shared read-only
/// between requests.
#[derive(Debug, Clone, Default)]
pub struct CredentialSettings {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub access_token: Option<Secret<String>>,
}

/// The credential mode in effect for one inbound request.
#[derive(Debug, Clone)]
pub enum Credentials {
    ClientIdSecret {
        id: String,
        secret: Secret<String>,
    },
    AccessToken {
        token: Secret<String>,
    },
    None,
}

impl Credentials {
    /// Short mode name for logs and the health endpoint.
    pub fn mode(&self) -> &'static str {
        match self {
            Credentials::ClientIdSecret { .. } => "client_id_secret",
            Credentials::AccessToken { .. } => "access_token",
            Credentials::None => "none",
        }
    }
}

impl CredentialSettings {
    /// Mode these settings resolve to, without logging.
    pub fn mode(&self) -> &'static str {
        choose(self).mode()
    }
}

fn non_empty(secret: &Option<Secret<String>>) -> Option<&Secret<String>> {
    secret.as_ref().filter(|s| !s.is_empty())
}

fn choose(settings: &CredentialSettings) -> Credentials {
    if let Some(secret) = non_empty(&settings.client_secret)
        && !settings.client_id.is_empty()
    {
        return Credentials::ClientIdSecret {
            id: settings.client_id.clone(),
            secret: secret.clone(),
        };
    }

    if let Some(token) = non_empty(&settings.access_token) {
        return Credentials::AccessToken {
            token: token.clone(),
        };
    }

    Credentials::None
}

/// Choose the credential mode for a request.
///
/// Client id/secret wins over an access token when both are configured.
/// The choice is logged for the operator; a missing credential is a warning.
pub fn select(settings: &CredentialSettings) -> Credentials {
    let credentials = choose(settings);
    match &credentials {
        Credentials::ClientIdSecret { .. } => {
            info!(mode = credentials.mode(), "using client_id and client_secret");
        }
        Credentials::AccessToken { .. } => {
            info!(mode = credentials.mode(), "using access_token");
        }
        Credentials::None => {
            warn!(
                mode = credentials.mode(),
                "not authenticated; unauthenticated requests are subject to aggressive rate limiting"
            );
        }
    }
    credentials
}
