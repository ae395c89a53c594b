//! Main client implementation.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use opencode_config::ClientConfig;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::{
    AgentsApi, ConfigApi, EventsApi, FilesApi, HealthApi, McpApi, MessagesApi, ProjectsApi,
    PtyApi, SessionsApi,
};
use crate::error::{Error, Result, error_message};
use crate::resilience::{CallContext, CircuitBreaker, Pipeline};

/// How long a call is expected to take, which selects its deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallKind {
    /// Metadata operation bounded by `default_timeout`.
    #[default]
    Quick,
    /// Operation that runs AI generation, bounded by `message_timeout`.
    Generation,
    /// SSE subscription; only connection establishment is bounded.
    Stream,
}

/// One HTTP call, described independently of any attempt.
///
/// The JSON body is serialized once when the request is built and re-sent
/// verbatim on every retry.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    kind: CallKind,
}

impl Request {
    /// Create a request for `path` (relative to the base URL).
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            kind: CallKind::Quick,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Append a query parameter if `value` is set.
    pub fn query_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::Config(format!("{}: cannot encode body: {e}", self.operation())))?;
        self.body = Some(bytes);
        Ok(self)
    }

    /// Set the call kind.
    pub fn kind(mut self, kind: CallKind) -> Self {
        self.kind = kind;
        self
    }

    /// Shorthand for `kind(CallKind::Generation)`.
    pub fn generation(self) -> Self {
        self.kind(CallKind::Generation)
    }

    /// Operation label used in errors and logs, e.g. `POST /session`.
    pub fn operation(&self) -> String {
        format!("{} /{}", self.method, self.path.trim_start_matches('/'))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call_kind(&self) -> CallKind {
        self.kind
    }
}

/// OpenCode server client.
///
/// Cheap to clone; clones share the connection pool and the circuit breaker.
///
/// # Example
///
/// ```no_run
/// use opencode_client::OpencodeClient;
///
/// # async fn example() -> opencode_client::Result<()> {
/// let client = OpencodeClient::builder()
///     .base_url("http://127.0.0.1:4096")
///     .build()?;
///
/// let sessions = client.sessions().list().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OpencodeClient {
    inner: Arc<ClientInner>,
    cancel: CancellationToken,
}

pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: Url,
    pub(crate) config: ClientConfig,
    pub(crate) pipeline: Pipeline,
}

impl std::fmt::Debug for OpencodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpencodeClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("layers", &self.inner.pipeline.layers().len())
            .finish()
    }
}

impl OpencodeClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client from a configuration.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Create a client with default settings pointing to the local server.
    pub fn localhost() -> Result<Self> {
        Self::builder().build()
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Configuration the client was built with.
    pub fn client_config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Resilience layers wrapped around every request.
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// The shared circuit breaker, if enabled.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.inner.pipeline.circuit_breaker()
    }

    /// A handle whose calls observe `token`.
    ///
    /// The handle shares the connection pool and circuit breaker with `self`.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: token,
        }
    }

    /// Token observed by this handle's calls.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the health API.
    pub fn health(&self) -> HealthApi {
        HealthApi::new(self.clone())
    }

    /// Access the sessions API.
    pub fn sessions(&self) -> SessionsApi {
        SessionsApi::new(self.clone())
    }

    /// Access the messages API.
    pub fn messages(&self) -> MessagesApi {
        MessagesApi::new(self.clone())
    }

    /// Access the file and search API.
    pub fn files(&self) -> FilesApi {
        FilesApi::new(self.clone())
    }

    /// Access the PTY API.
    pub fn pty(&self) -> PtyApi {
        PtyApi::new(self.clone())
    }

    /// Access the MCP API.
    pub fn mcp(&self) -> McpApi {
        McpApi::new(self.clone())
    }

    /// Access the server configuration API.
    pub fn config(&self) -> ConfigApi {
        ConfigApi::new(self.clone())
    }

    /// Access the agents API.
    pub fn agents(&self) -> AgentsApi {
        AgentsApi::new(self.clone())
    }

    /// Access the projects API.
    pub fn projects(&self) -> ProjectsApi {
        ProjectsApi::new(self.clone())
    }

    /// Access the server event bus.
    pub fn events(&self) -> EventsApi {
        EventsApi::new(self.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner.base_url.join(path).map_err(Error::from)
    }

    /// Perform a buffered call and decode the JSON response.
    ///
    /// An empty body decodes as `null`, so `()` and `Option<T>` work for
    /// endpoints answering 204.
    pub async fn request<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let operation = request.operation();
        let ctx = self.context(&operation, request.kind);
        let url = self.url(&request.path)?;

        let body = self
            .inner
            .pipeline
            .execute(&ctx, || self.attempt(&ctx, &url, &request).boxed())
            .await?;

        decode_body(&operation, &body)
    }

    /// Perform a buffered call whose response body is irrelevant.
    pub async fn request_ack(&self, request: Request) -> Result<()> {
        self.request::<serde::de::IgnoredAny>(request).await?;
        Ok(())
    }

    /// Open an SSE connection.
    ///
    /// Returns once response headers arrive; the body is left unread for the
    /// caller to stream. The pipeline covers connection establishment only.
    pub async fn open_stream(&self, request: Request) -> Result<reqwest::Response> {
        let request = request.kind(CallKind::Stream);
        let operation = request.operation();
        let ctx = self.context(&operation, CallKind::Stream);
        let url = self.url(&request.path)?;

        self.inner
            .pipeline
            .execute(&ctx, || self.send(&ctx, &url, &request).boxed())
            .await
    }

    fn context(&self, operation: &str, kind: CallKind) -> CallContext {
        let ctx = CallContext::new(operation).with_cancel(self.cancel.clone());
        match kind {
            CallKind::Generation => ctx.with_deadline(self.inner.config.message_timeout()),
            CallKind::Quick | CallKind::Stream => ctx,
        }
    }

    /// Whole-request deadline handed to reqwest.
    fn request_timeout(&self, kind: CallKind) -> Option<Duration> {
        match kind {
            CallKind::Quick => Some(self.inner.config.default_timeout()),
            CallKind::Generation => Some(self.inner.config.message_timeout()),
            CallKind::Stream => None,
        }
    }

    /// One attempt of a buffered call: send and read the whole body.
    async fn attempt(&self, ctx: &CallContext, url: &Url, request: &Request) -> Result<Vec<u8>> {
        let response = self.send(ctx, url, request).await?;
        let deadline = self.request_timeout(request.kind).unwrap_or_default();

        let bytes = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::cancelled(&ctx.operation)),
            bytes = response.bytes() => bytes,
        };
        bytes
            .map(|b| b.to_vec())
            .map_err(|e| Error::from_reqwest(&ctx.operation, e, deadline))
    }

    /// Send one request and map non-success statuses to errors.
    async fn send(
        &self,
        ctx: &CallContext,
        url: &Url,
        request: &Request,
    ) -> Result<reqwest::Response> {
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body.clone());
        }
        let timeout = self.request_timeout(request.kind);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if request.kind == CallKind::Stream {
            builder = builder.header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        tracing::debug!(operation = %ctx.operation, url = %url, "Sending request");

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::cancelled(&ctx.operation)),
            response = builder.send() => response
                .map_err(|e| Error::from_reqwest(&ctx.operation, e, timeout.unwrap_or_default()))?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Stream calls carry no whole-request deadline; bound the error body.
        let read_limit = timeout.unwrap_or_else(|| self.inner.config.default_timeout());
        let body = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::cancelled(&ctx.operation)),
            body = tokio::time::timeout(read_limit, response.text()) => {
                body.ok().and_then(|text| text.ok()).unwrap_or_default()
            }
        };
        let status = status.as_u16();
        tracing::debug!(operation = %ctx.operation, status, "Request failed");
        Err(Error::from_status(
            &ctx.operation,
            status,
            error_message(status, &body),
        ))
    }
}

fn decode_body<T: DeserializeOwned>(operation: &str, body: &[u8]) -> Result<T> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| Error::Decode {
        operation: operation.to_string(),
        message: e.to_string(),
    })
}

/// Builder for creating an [`OpencodeClient`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    pipeline: Option<Pipeline>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base URL for the server.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(agent.into());
        self
    }

    /// Share an existing circuit breaker (e.g. across several clients).
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Use an explicit resilience pipeline instead of one built from config.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Use a preconfigured reqwest client. The user agent setting is ignored.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<OpencodeClient> {
        self.config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Parse and normalize base URL
        let mut base_url = Url::parse(&self.config.base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let http = match self.http {
            Some(http) => http,
            None => {
                let user_agent = self
                    .config
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| format!("opencode-client/{}", env!("CARGO_PKG_VERSION")));
                reqwest::Client::builder()
                    .user_agent(user_agent)
                    .build()
                    .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?
            }
        };

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => Pipeline::from_config(&self.config, self.circuit_breaker),
        };

        Ok(OpencodeClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                config: self.config,
                pipeline,
            }),
            cancel: CancellationToken::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, Layer};

    #[test]
    fn test_builder_defaults_to_local_server() {
        let client = ClientBuilder::new().build().unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:4096/");
        assert_eq!(client.pipeline().layers().len(), 3);
    }

    #[test]
    fn test_builder_with_base_url() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080")
            .build()
            .unwrap();

        assert_eq!(client.base_url().as_str(), "http://localhost:8080/");
    }

    #[test]
    fn test_builder_normalizes_trailing_slash() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080/")
            .build()
            .unwrap();

        assert_eq!(client.base_url().as_str(), "http://localhost:8080/");
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let err = ClientBuilder::new().base_url("").build().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);

        let err = ClientBuilder::new().base_url("not a url").build().unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_url_building() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080")
            .build()
            .unwrap();

        let url = client.url("session").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/session");

        let url = client.url("/session/ses_1/message").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/session/ses_1/message");
    }

    #[test]
    fn test_url_building_keeps_base_path() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080/proxy")
            .build()
            .unwrap();

        let url = client.url("/session").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/proxy/session");
    }

    #[test]
    fn test_shared_breaker_across_clients() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let a = ClientBuilder::new()
            .circuit_breaker(breaker.clone())
            .build()
            .unwrap();
        let b = a.with_cancellation(CancellationToken::new());

        assert!(Arc::ptr_eq(a.circuit_breaker().unwrap(), &breaker));
        assert!(Arc::ptr_eq(b.circuit_breaker().unwrap(), &breaker));
    }

    #[test]
    fn test_explicit_pipeline() {
        let client = ClientBuilder::new()
            .pipeline(Pipeline::passthrough())
            .build()
            .unwrap();
        assert!(client.pipeline().layers().is_empty());
        assert!(client.circuit_breaker().is_none());

        let client = ClientBuilder::new()
            .config(ClientConfig {
                enable_retry: false,
                ..Default::default()
            })
            .build()
            .unwrap();
        assert!(
            !client
                .pipeline()
                .layers()
                .iter()
                .any(|l| matches!(l, Layer::Retry(_)))
        );
    }

    #[test]
    fn test_request_operation_label() {
        let request = Request::get("session/ses_1").query("directory", "/repo");
        assert_eq!(request.operation(), "GET /session/ses_1");
        assert_eq!(request.call_kind(), CallKind::Quick);

        let request = Request::post("/session/ses_1/message").generation();
        assert_eq!(request.operation(), "POST /session/ses_1/message");
        assert_eq!(request.call_kind(), CallKind::Generation);
    }

    #[test]
    fn test_request_query_opt() {
        let request = Request::get("file")
            .query_opt("path", Some("src"))
            .query_opt("limit", None::<u32>);
        assert_eq!(request.query, vec![("path".to_string(), "src".to_string())]);
    }

    #[test]
    fn test_decode_empty_body() {
        let unit: () = decode_body("POST /x", b"").unwrap();
        assert_eq!(unit, ());
        let none: Option<u32> = decode_body("GET /x", b"  \n").unwrap();
        assert!(none.is_none());

        let err = decode_body::<u32>("GET /x", b"{oops").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);
    }

    #[test]
    fn test_generation_context_uses_message_timeout() {
        let client = ClientBuilder::new().build().unwrap();
        let ctx = client.context("POST /session/x/message", CallKind::Generation);
        assert_eq!(ctx.deadline, Some(Duration::from_secs(300)));
        assert!(client.context("GET /session", CallKind::Quick).deadline.is_none());
        assert_eq!(client.request_timeout(CallKind::Stream), None);
    }
}
