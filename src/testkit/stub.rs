//! Programmable HTTP stub server.
//!
//! Rules pair a [`RequestMatcher`] with a [`StubResponse`]. For every incoming
//! request the matching rule with the lowest priority number is used; on a
//! tie exact matchers beat pattern matchers, and among equals the most
//! recently registered rule wins. Rules registered without a priority get
//! [`DEFAULT_PRIORITY`].
//!
//! ```no_run
//! use sampleapp::testkit::stub::{RequestMatcher, StubResponse, StubServer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = StubServer::new();
//! server.register(
//!     RequestMatcher::exact("/helloext").method(axum::http::Method::GET),
//!     StubResponse::text("Hi "),
//! );
//! let (_key, base_url) = server.start().await?;
//! println!("stub listening on {base_url}");
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::cmp::Reverse;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use regex::Regex;
use reqwest::Url;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GREETING_SERVICE_URL_KEY;

/// Priority given to rules registered through [`StubServer::register`].
pub const DEFAULT_PRIORITY: u32 = 5;

/// Headers that describe a single connection and must not be forwarded by
/// the proxy in either direction.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum StubError {
    #[error("invalid URL pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid proxy upstream `{0}`")]
    Upstream(String),
    #[error("failed to bind stub server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("stub server is already running at {0}")]
    AlreadyStarted(String),
    #[error("stub server task failed: {0}")]
    Serve(String),
}

#[derive(Debug, Clone)]
enum UrlMatcher {
    Equal(String),
    Matching(Regex),
}

/// Decides whether a rule applies to a request. URLs are compared against the
/// request's path and query string.
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    method: Option<Method>,
    url: UrlMatcher,
}

impl RequestMatcher {
    /// Matches when the path and query equal `url` exactly.
    pub fn exact(url: impl Into<String>) -> Self {
        Self {
            method: None,
            url: UrlMatcher::Equal(url.into()),
        }
    }

    /// Matches when the whole path and query match `pattern`.
    pub fn pattern(pattern: &str) -> Result<Self, StubError> {
        let anchored = format!("^(?:{pattern})$");
        let regex = Regex::new(&anchored).map_err(|source| StubError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            method: None,
            url: UrlMatcher::Matching(regex),
        })
    }

    /// Restricts the matcher to a single HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn matches(&self, method: &Method, path_and_query: &str) -> bool {
        if let Some(expected) = &self.method {
            if expected != method {
                return false;
            }
        }
        match &self.url {
            UrlMatcher::Equal(url) => url == path_and_query,
            UrlMatcher::Matching(regex) => regex.is_match(path_and_query),
        }
    }

    fn specificity(&self) -> u8 {
        match self.url {
            UrlMatcher::Equal(_) => 0,
            UrlMatcher::Matching(_) => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StubResponse {
    Canned {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    /// Forward the request unmodified to `upstream` and relay its answer.
    Proxy { upstream: Url },
}

impl StubResponse {
    /// Empty response with the given status.
    pub fn status(status: StatusCode) -> Self {
        Self::Canned {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `200 OK` with a `text/plain` body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::status(StatusCode::OK)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_body(body.into())
    }

    pub fn proxied_from(upstream: &str) -> Result<Self, StubError> {
        let upstream =
            Url::parse(upstream).map_err(|_| StubError::Upstream(upstream.to_string()))?;
        if upstream.cannot_be_a_base() {
            return Err(StubError::Upstream(upstream.to_string()));
        }
        Ok(Self::Proxy { upstream })
    }

    /// Adds a header to a canned response. Proxy responses are left as is.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if let Self::Canned { headers, .. } = &mut self {
            headers.insert(name, value);
        }
        self
    }

    /// Replaces the body of a canned response. Proxy responses are left as is.
    pub fn with_body(mut self, new_body: impl Into<Bytes>) -> Self {
        if let Self::Canned { body, .. } = &mut self {
            *body = new_body.into();
        }
        self
    }
}

#[derive(Debug, Clone)]
struct StubRule {
    sequence: u64,
    priority: u32,
    matcher: RequestMatcher,
    response: StubResponse,
}

/// A request served by the stub, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
}

#[derive(Debug, Default)]
struct StubState {
    rules: RwLock<Vec<StubRule>>,
    journal: Mutex<Vec<RecordedRequest>>,
    sequence: AtomicU64,
    client: reqwest::Client,
}

impl StubState {
    fn add_rule(&self, matcher: RequestMatcher, response: StubResponse, priority: u32) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StubRule {
                sequence,
                priority,
                matcher,
                response,
            });
    }

    fn select(&self, method: &Method, path_and_query: &str) -> Option<StubRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|rule| rule.matcher.matches(method, path_and_query))
            .min_by_key(|rule| {
                (
                    rule.priority,
                    rule.matcher.specificity(),
                    Reverse(rule.sequence),
                )
            })
            .cloned()
    }

    fn record(&self, method: &Method, url: &str) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                method: method.clone(),
                url: url.to_string(),
            });
    }
}

struct RunningStub {
    base_url: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Local HTTP server answering requests from a table of [`RequestMatcher`] /
/// [`StubResponse`] rules.
pub struct StubServer {
    port: u16,
    state: Arc<StubState>,
    running: Option<RunningStub>,
}

impl Default for StubServer {
    fn default() -> Self {
        Self::new()
    }
}

impl StubServer {
    /// Stub server that will listen on an ephemeral port.
    pub fn new() -> Self {
        Self::with_port(0)
    }

    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            state: Arc::new(StubState::default()),
            running: None,
        }
    }

    pub fn register(&self, matcher: RequestMatcher, response: StubResponse) {
        self.register_with_priority(matcher, response, DEFAULT_PRIORITY);
    }

    /// Registers a rule; a lower `priority` number takes precedence.
    pub fn register_with_priority(
        &self,
        matcher: RequestMatcher,
        response: StubResponse,
        priority: u32,
    ) {
        self.state.add_rule(matcher, response, priority);
    }

    /// Binds the listener and starts serving. Returns the configuration key
    /// and value that point the greeting client at this server.
    pub async fn start(&mut self) -> Result<(String, String), StubError> {
        if let Some(running) = &self.running {
            return Err(StubError::AlreadyStarted(running.base_url.clone()));
        }

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StubError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StubError::Bind { addr, source })?;
        let base_url = format!("http://{local_addr}");

        let app = Router::new()
            .fallback(dispatch)
            .with_state(Arc::clone(&self.state));
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        info!(%base_url, "stub server started");
        self.running = Some(RunningStub {
            base_url: base_url.clone(),
            shutdown,
            task,
        });

        Ok((GREETING_SERVICE_URL_KEY.to_string(), base_url))
    }

    /// `http://127.0.0.1:<port>` while running.
    pub fn base_url(&self) -> Option<&str> {
        self.running.as_ref().map(|running| running.base_url.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_requests(&self) {
        self.state
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Stops serving and waits for the listener to close. No-op when the
    /// server is not running.
    pub async fn stop(&mut self) -> Result<(), StubError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown.send(());
        let outcome = running
            .task
            .await
            .map_err(|err| StubError::Serve(err.to_string()))?;
        outcome.map_err(|err| StubError::Serve(err.to_string()))?;

        info!(base_url = %running.base_url, "stub server stopped");
        Ok(())
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(());
        }
    }
}

async fn dispatch(State(state): State<Arc<StubState>>, request: Request) -> Response {
    let method = request.method().clone();
    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    state.record(&method, &url);

    let Some(rule) = state.select(&method, &url) else {
        debug!(%method, %url, "no stub matched");
        return StatusCode::NOT_FOUND.into_response();
    };
    debug!(%method, %url, priority = rule.priority, "stub matched");

    match rule.response {
        StubResponse::Canned {
            status,
            headers,
            body,
        } => (status, headers, body).into_response(),
        StubResponse::Proxy { upstream } => {
            match forward(&state.client, &upstream, &url, request).await {
                Ok(response) => response,
                Err(reason) => {
                    warn!(%upstream, %url, %reason, "proxying stub request failed");
                    (StatusCode::BAD_GATEWAY, reason).into_response()
                }
            }
        }
    }
}

async fn forward(
    client: &reqwest::Client,
    upstream: &Url,
    path_and_query: &str,
    request: Request,
) -> Result<Response, String> {
    let target = upstream_target(upstream, path_and_query);
    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .map_err(|err| err.to_string())?;

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|err| format!("cannot read request body: {err}"))?;

    let mut outbound = client.request(method, target.clone()).body(body.to_vec());
    for (name, value) in parts.headers.iter() {
        if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name.as_str())
        {
            continue;
        }
        outbound = outbound.header(name.as_str(), value.as_bytes());
    }

    let upstream_response = outbound
        .send()
        .await
        .map_err(|err| format!("upstream {target} unreachable: {err}"))?;

    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .map_err(|err| err.to_string())?;
    let mut headers = HeaderMap::new();
    for (name, value) in upstream_response.headers() {
        if is_hop_by_hop(name.as_str()) || name == reqwest::header::CONTENT_LENGTH {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }
    let body = upstream_response
        .bytes()
        .await
        .map_err(|err| format!("cannot read upstream body: {err}"))?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Appends the request path to the upstream's own path and carries the query
/// over unchanged. The request path is never parsed as a URL on its own.
fn upstream_target(upstream: &Url, path_and_query: &str) -> Url {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    let mut target = upstream.clone();
    target.set_path(&format!("{}{}", upstream.path().trim_end_matches('/'), path));
    target.set_query(query);
    target
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}
