//! Upstream HTTP client driving the pagination state machine

use credentials::Credentials;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::UpstreamError;
use crate::link::next_link;
use crate::machine::{PagingAction, PagingEvent, PagingState, handle_event};

/// GitHub rejects requests without a User-Agent.
pub const DEFAULT_USER_AGENT: &str = "JupyterLab GitHub";

/// Successful outcome of a paginated fetch.
#[derive(Debug)]
pub struct Collected {
    /// Status of the last page fetched
    pub status: StatusCode,
    /// Concatenated array, or the single non-array body
    pub body: Value,
    pub pages: u32,
}

/// Client for one upstream REST API.
///
/// Cheap to clone; the inner `reqwest::Client` shares its connection pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    api_base: Url,
    user_agent: HeaderValue,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> common::Result<Self> {
        let invalid = |reason: String| common::Error::InvalidUrl {
            url: api_base.to_string(),
            reason,
        };
        let parsed = Url::parse(api_base).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https".into()));
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(invalid("must not carry a query or fragment".into()));
        }
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| common::Error::Config(format!("invalid user_agent: {e}")))?;

        Ok(Self {
            http,
            api_base: parsed,
            user_agent,
            timeout,
        })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// URL and extra headers for page 1 of `path`.
    ///
    /// Each path segment is percent-encoded and appended to the API base.
    /// Empty, `.` and `..` segments are dropped so the request cannot
    /// climb out of the base path.
    pub fn first_page(&self, path: &str, credentials: &Credentials) -> (Url, HeaderMap) {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(
                path.split('/')
                    .filter(|s| !s.is_empty() && *s != "." && *s != ".."),
            );
        }

        let mut headers = HeaderMap::new();
        credentials.apply(&mut url, &mut headers);
        (url, headers)
    }

    /// Fetch `path` and every page linked from it via `rel="next"`.
    ///
    /// Pages are fetched strictly in sequence. The first failure aborts the
    /// fetch and is returned as-is; pages collected before it are dropped.
    #[instrument(skip_all, fields(path = %path, mode = credentials.mode()))]
    pub async fn fetch_all(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> Result<Collected, UpstreamError> {
        let (first_url, first_headers) = self.first_page(path, credentials);
        let mut first_headers = Some(first_headers);

        let (mut state, mut action) = handle_event(
            PagingState::Start {
                origin: self.api_base.clone(),
            },
            PagingEvent::Begin { url: first_url },
        );

        while let PagingAction::Fetch { url, page } = action {
            // Continuation URLs come from upstream and already carry what
            // its pagination needs; only the user agent is re-sent.
            let headers = if page == 1 {
                first_headers.take().unwrap_or_default()
            } else {
                HeaderMap::new()
            };
            debug!(page, "fetching page");
            let event = self.fetch_page(url, headers).await;
            (state, action) = handle_event(state, event);
        }

        match state {
            PagingState::Done {
                status,
                body,
                pages,
            } => {
                debug!(pages, "pagination complete");
                Ok(Collected {
                    status,
                    body,
                    pages,
                })
            }
            PagingState::Failed(err) => Err(err),
            PagingState::Start { .. } | PagingState::FetchingPage { .. } => Err(
                UpstreamError::Internal("pagination stopped before a terminal state".into()),
            ),
        }
    }

    async fn fetch_page(&self, url: Url, mut headers: HeaderMap) -> PagingEvent {
        headers.insert(USER_AGENT, self.user_agent.clone());

        let response = match self
            .http
            .get(url)
            .headers(headers)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return PagingEvent::FetchFailed(self.classify(e)),
        };

        let status = response.status();
        let next = next_link(response.headers());
        let content_type = response.headers().get(CONTENT_TYPE).cloned();

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return PagingEvent::FetchFailed(self.classify(e)),
        };

        if !status.is_success() {
            debug!(%status, "upstream returned an error status");
            return PagingEvent::FetchFailed(UpstreamError::Status {
                status,
                body,
                content_type,
            });
        }

        PagingEvent::PageLoaded { status, next, body }
    }

    /// The request URL may hold `client_secret`, so it is stripped before
    /// the error message can reach logs or the inbound caller.
    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        UpstreamError::from_reqwest(err.without_url(), self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::{RawQuery, State};
    use axum::http::Request;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use common::Secret;
    use reqwest::header::{AUTHORIZATION, LINK};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// What the mock upstream saw for one request.
    #[derive(Debug, Clone)]
    struct Seen {
        path: String,
        query: String,
        authorization: Option<String>,
        user_agent: Option<String>,
    }

    /// Mock upstream serving `pages` pages of `[{"id": n}]` at `/items`.
    #[derive(Clone)]
    struct MockUpstream {
        base: String,
        pages: u32,
        fail_page: Option<u32>,
        link_override: Option<&'static str>,
        malformed_page: Option<u32>,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    fn record(seen: &Mutex<Vec<Seen>>, path: &str, query: Option<String>, headers: &HeaderMap) {
        let header = |name: reqwest::header::HeaderName| {
            headers
                .get(name)
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(str::to_string)
        };
        seen.lock().unwrap().push(Seen {
            path: path.to_string(),
            query: query.unwrap_or_default(),
            authorization: header(AUTHORIZATION),
            user_agent: header(USER_AGENT),
        });
    }

    async fn mock_items(
        State(mock): State<MockUpstream>,
        RawQuery(query): RawQuery,
        headers: HeaderMap,
    ) -> Response {
        record(&mock.seen, "/items", query.clone(), &headers);

        let page: u32 = query
            .as_deref()
            .unwrap_or_default()
            .split('&')
            .find_map(|kv| kv.strip_prefix("page="))
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);

        if mock.fail_page == Some(page) {
            return (
                StatusCode::FORBIDDEN,
                [(CONTENT_TYPE, "application/json")],
                r#"{"message":"rate limited"}"#,
            )
                .into_response();
        }

        let mut response = axum::Json(json!([{ "id": page }])).into_response();
        let link = match mock.link_override {
            Some(link) => Some(link.to_string()),
            None if mock.malformed_page == Some(page) => Some("this is not a link header".into()),
            None if page < mock.pages => Some(format!(
                r#"<{}/items?page={}>; rel="next", <{}/items?page={}>; rel="last""#,
                mock.base,
                page + 1,
                mock.base,
                mock.pages
            )),
            None => None,
        };
        if let Some(link) = link {
            response
                .headers_mut()
                .insert(LINK, HeaderValue::from_str(&link).unwrap());
        }
        response
    }

    async fn start_mock(
        pages: u32,
        fail_page: Option<u32>,
        link_override: Option<&'static str>,
    ) -> (String, Arc<Mutex<Vec<Seen>>>) {
        serve_mock(pages, fail_page, link_override, None).await
    }

    async fn serve_mock(
        pages: u32,
        fail_page: Option<u32>,
        link_override: Option<&'static str>,
        malformed_page: Option<u32>,
    ) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mock = MockUpstream {
            base: base.clone(),
            pages,
            fail_page,
            link_override,
            malformed_page,
            seen: seen.clone(),
        };
        let app = Router::new()
            .route("/items", get(mock_items))
            .fallback(|request: Request<Body>| async move {
                let path = request.uri().path().to_string();
                axum::Json(json!({ "path": path }))
            })
            .with_state(mock);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, seen)
    }

    fn client(base: &str) -> UpstreamClient {
        UpstreamClient::new(
            reqwest::Client::new(),
            base,
            DEFAULT_USER_AGENT,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn oauth_app() -> Credentials {
        Credentials::ClientIdSecret {
            id: "app-id".into(),
            secret: Secret::from("app-secret"),
        }
    }

    #[test]
    fn first_page_joins_base_and_path() {
        let c = client("https://api.github.com");
        let (url, headers) = c.first_page("/repos/foo/bar/issues", &Credentials::None);
        assert_eq!(url.as_str(), "https://api.github.com/repos/foo/bar/issues");
        assert!(headers.is_empty());
    }

    #[test]
    fn first_page_keeps_base_path_prefix() {
        let c = client("https://ghe.example.com/api/v3/");
        let (url, _) = c.first_page("user/repos", &Credentials::None);
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/user/repos");
    }

    #[test]
    fn first_page_percent_encodes_segments() {
        let c = client("https://api.github.com");
        let (url, _) = c.first_page("repos/foo/my repo/contents/a?b#c", &Credentials::None);
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/foo/my%20repo/contents/a%3Fb%23c"
        );
    }

    #[test]
    fn first_page_drops_dot_segments() {
        let c = client("https://api.github.com/base");
        let (url, _) = c.first_page("../../etc//./passwd", &Credentials::None);
        assert_eq!(url.as_str(), "https://api.github.com/base/etc/passwd");
    }

    #[test]
    fn first_page_applies_credentials() {
        let c = client("https://api.github.com");
        let (url, _) = c.first_page("user", &oauth_app());
        assert_eq!(
            url.as_str(),
            "https://api.github.com/user?client_id=app-id&client_secret=app-secret&per_page=100"
        );
    }

    #[test]
    fn new_rejects_unusable_bases() {
        for base in [
            "api.github.com",
            "ftp://api.github.com",
            "https://api.github.com/?x=1",
            "mailto:ops@example.com",
        ] {
            assert!(
                UpstreamClient::new(reqwest::Client::new(), base, "ua", Duration::from_secs(1))
                    .is_err(),
                "{base} must be rejected"
            );
        }
    }

    #[test]
    fn new_rejects_invalid_user_agent() {
        let result = UpstreamClient::new(
            reqwest::Client::new(),
            "https://api.github.com",
            "bad\nagent",
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(common::Error::Config(_))));
    }

    #[tokio::test]
    async fn concatenates_all_pages_in_order() {
        for pages in [1u32, 2, 5] {
            let (base, seen) = start_mock(pages, None, None).await;
            let collected = client(&base)
                .fetch_all("items", &Credentials::None)
                .await
                .unwrap();

            let expected: Vec<Value> = (1..=pages).map(|n| json!({ "id": n })).collect();
            assert_eq!(collected.body, Value::Array(expected));
            assert_eq!(collected.pages, pages);
            assert_eq!(collected.status, StatusCode::OK);
            assert_eq!(seen.lock().unwrap().len(), pages as usize);
        }
    }

    #[tokio::test]
    async fn single_page_body_is_returned_unchanged() {
        let (base, _) = start_mock(1, None, None).await;
        let collected = client(&base)
            .fetch_all("repos/foo/bar", &Credentials::None)
            .await
            .unwrap();
        assert_eq!(collected.body, json!({ "path": "/repos/foo/bar" }));
        assert_eq!(collected.pages, 1);
    }

    #[tokio::test]
    async fn client_credentials_sent_on_first_page_only() {
        let (base, seen) = start_mock(3, None, None).await;
        client(&base).fetch_all("items", &oauth_app()).await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[0].query,
            "client_id=app-id&client_secret=app-secret&per_page=100"
        );
        assert_eq!(seen[1].query, "page=2");
        assert_eq!(seen[2].query, "page=3");
        assert!(seen.iter().all(|s| s.authorization.is_none()));
        assert!(
            seen.iter()
                .all(|s| s.user_agent.as_deref() == Some(DEFAULT_USER_AGENT)),
            "user agent must be sent on every page: {seen:?}"
        );
    }

    #[tokio::test]
    async fn access_token_sent_on_first_page_only() {
        let (base, seen) = start_mock(2, None, None).await;
        let token = Credentials::AccessToken {
            token: Secret::from("ghp_abc"),
        };
        client(&base).fetch_all("items", &token).await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen[0].authorization.as_deref(), Some("token ghp_abc"));
        assert_eq!(seen[0].query, "per_page=100");
        assert!(seen[1].authorization.is_none());
        assert_eq!(seen[1].query, "page=2");
    }

    #[tokio::test]
    async fn unauthenticated_request_carries_no_credentials() {
        let (base, seen) = start_mock(1, None, None).await;
        client(&base)
            .fetch_all("items", &Credentials::None)
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen[0].path, "/items");
        assert_eq!(seen[0].query, "");
        assert!(seen[0].authorization.is_none());
        assert_eq!(seen[0].user_agent.as_deref(), Some(DEFAULT_USER_AGENT));
    }

    #[tokio::test]
    async fn failing_page_aborts_without_partial_result() {
        let (base, seen) = start_mock(3, Some(2), None).await;
        let err = client(&base)
            .fetch_all("items", &Credentials::None)
            .await
            .unwrap_err();

        match err {
            UpstreamError::Status {
                status,
                body,
                content_type,
            } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(&body[..], br#"{"message":"rate limited"}"#);
                assert_eq!(content_type.unwrap(), "application/json");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 2, "page 3 must never be requested");
    }

    #[tokio::test]
    async fn malformed_link_header_ends_pagination() {
        let (base, seen) = start_mock(3, None, Some("this is not a link header")).await;
        let collected = client(&base)
            .fetch_all("items", &Credentials::None)
            .await
            .unwrap();
        assert_eq!(collected.body, json!([{ "id": 1 }]));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_link_on_later_page_keeps_pages_so_far() {
        let (base, seen) = serve_mock(3, None, None, Some(2)).await;
        let collected = client(&base)
            .fetch_all("items", &Credentials::None)
            .await
            .unwrap();
        assert_eq!(collected.body, json!([{ "id": 1 }, { "id": 2 }]));
        assert_eq!(collected.pages, 2);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2, "page 3 must never be requested");
        assert_eq!(seen[1].query, "page=2");
    }

    #[tokio::test]
    async fn cyclic_next_links_stop_at_first_revisit() {
        // Self link: page 1 points at itself.
        let (base, seen) = start_mock(3, None, Some(r#"</items>; rel="next""#)).await;
        let collected = client(&base)
            .fetch_all("items", &Credentials::None)
            .await
            .unwrap();
        assert_eq!(collected.body, json!([{ "id": 1 }]));
        assert_eq!(seen.lock().unwrap().len(), 1);

        // Two-step loop: /items -> /items?page=1 -> /items?page=1
        let (base, seen) = start_mock(3, None, Some(r#"</items?page=1>; rel="next""#)).await;
        let collected = tokio::time::timeout(
            Duration::from_secs(5),
            client(&base).fetch_all("items", &Credentials::None),
        )
        .await
        .expect("cyclic pagination must terminate")
        .unwrap();
        assert_eq!(collected.body, json!([{ "id": 1 }, { "id": 1 }]));
        assert_eq!(collected.pages, 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn next_link_to_other_host_is_not_followed() {
        let (base, seen) = start_mock(
            3,
            None,
            Some(r#"<https://elsewhere.invalid/items?page=2>; rel="next""#),
        )
        .await;
        let collected = client(&base)
            .fetch_all("items", &Credentials::None)
            .await
            .unwrap();
        assert_eq!(collected.body, json!([{ "id": 1 }]));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dead_upstream_is_transport_error_without_secrets() {
        let err = client("http://127.0.0.1:1")
            .fetch_all("items", &oauth_app())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)), "got {err:?}");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(
            !err.to_string().contains("app-secret"),
            "error message must not leak the client secret: {err}"
        );
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(socket);
                });
            }
        });

        let c = UpstreamClient::new(
            reqwest::Client::new(),
            &base,
            DEFAULT_USER_AGENT,
            Duration::from_millis(50),
        )
        .unwrap();
        let err = c.fetch_all("items", &Credentials::None).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout(_)), "got {err:?}");
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
