//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret and access token are loaded from env vars or files,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use credentials::CredentialSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Inbound listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Path prefix the proxy is mounted under (e.g. `/github`)
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream REST API settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-page fetch timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
        }
    }
}

/// GitHub credentials. Empty values mean "unset".
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
    /// File holding the OAuth app client secret (alternative to GITHUB_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    /// File holding a personal access token (alternative to GITHUB_ACCESS_TOKEN)
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
}

impl CredentialsConfig {
    /// Immutable snapshot handed to the proxy handler.
    pub fn settings(&self) -> CredentialSettings {
        CredentialSettings {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

fn default_route_prefix() -> String {
    "/github".into()
}

fn default_max_connections() -> usize {
    1000
}

fn default_api_base() -> String {
    "https://api.github.com".into()
}

fn default_user_agent() -> String {
    paging::DEFAULT_USER_AGENT.into()
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order (each of client secret and access token):
    /// 1. GITHUB_CLIENT_SECRET / GITHUB_ACCESS_TOKEN env var
    /// 2. client_secret_file / access_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        // Validate api_base is a valid URL with http(s) scheme
        if !config.upstream.api_base.starts_with("http://")
            && !config.upstream.api_base.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "api_base must start with http:// or https://, got: {}",
                config.upstream.api_base
            )));
        }

        if config.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        let prefix = &config.server.route_prefix;
        if !prefix.starts_with('/') || prefix.ends_with('/') || prefix.contains(['{', '}']) {
            return Err(common::Error::Config(format!(
                "route_prefix must start with '/', must not end with '/' and must not contain braces, got: {prefix}"
            )));
        }

        if let Ok(id) = std::env::var("GITHUB_CLIENT_ID") {
            config.credentials.client_id = id;
        }
        config.credentials.client_secret = resolve_secret(
            "GITHUB_CLIENT_SECRET",
            config.credentials.client_secret_file.as_deref(),
        )?;
        config.credentials.access_token = resolve_secret(
            "GITHUB_ACCESS_TOKEN",
            config.credentials.access_token_file.as_deref(),
        )?;

        if let Some(token) = &config.credentials.access_token
            && credentials::authorization_header(token).is_err()
        {
            return Err(common::Error::Config(
                "access token contains characters not allowed in an HTTP header".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("github-proxy.toml")
    }
}

/// Env var takes precedence over file. Blank values resolve to `None`.
fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    let value = if let Ok(value) = std::env::var(env_var) {
        value
    } else if let Some(file) = file {
        std::fs::read_to_string(file).map_err(|e| {
            common::Error::Config(format!("failed to read {}: {e}", file.display()))
        })?
    } else {
        return Ok(None);
    };

    let value = value.trim();
    if value.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Secret::from(value)))
    }
}
