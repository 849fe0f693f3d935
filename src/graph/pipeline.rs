//! Request pipeline: an ordered list of middleware in front of a transport.
//!
//! Middleware run outermost first. Each receives the request and a [`Next`]
//! handle for the rest of the chain, so it can inspect or rewrite the
//! request before delegating. The transport at the end performs the physical
//! send. The default chain is `[AuthMiddleware, LoggingMiddleware]`, which
//! means the logger sees the request exactly as it goes on the wire.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use tracing::{debug, info};

use crate::graph::auth::Authenticator;
use crate::graph::{GraphError, GraphResult};

/// Dedicated tracing target for request logs, so they can be routed or
/// filtered apart from application logs.
pub const REQUEST_LOG_TARGET: &str = "sharedrop::requests";

#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl GraphRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = Some(body.into());
        self
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

enum ResponseBody {
    Buffered(Bytes),
    Streaming(BoxStream<'static, GraphResult<Bytes>>),
}

/// Response handed back up the pipeline. The body is either already in
/// memory or still arriving as a stream of chunks.
pub struct GraphResponse {
    status: StatusCode,
    body: ResponseBody,
}

impl fmt::Debug for GraphResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            ResponseBody::Buffered(bytes) => format!("{} bytes", bytes.len()),
            ResponseBody::Streaming(_) => "streaming".to_string(),
        };
        f.debug_struct("GraphResponse")
            .field("status", &self.status)
            .field("body", &body)
            .finish()
    }
}

impl GraphResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: ResponseBody::Buffered(body.into()),
        }
    }

    pub fn streaming(status: StatusCode, body: BoxStream<'static, GraphResult<Bytes>>) -> Self {
        Self {
            status,
            body: ResponseBody::Streaming(body),
        }
    }

    pub fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GraphError::from))
            .boxed();
        Self::streaming(status, body)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Unknown")
    }

    pub async fn bytes(self) -> GraphResult<Bytes> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(mut chunks) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }

    pub async fn text(self) -> GraphResult<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn into_stream(self) -> BoxStream<'static, GraphResult<Bytes>> {
        match self.body {
            ResponseBody::Buffered(bytes) => stream::iter(std::iter::once(Ok(bytes))).boxed(),
            ResponseBody::Streaming(chunks) => chunks,
        }
    }
}

/// The physical send at the end of the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: GraphRequest) -> GraphResult<GraphResponse>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// `timeout` bounds each exchange from connect until the body is read.
    pub fn new(timeout: Duration) -> GraphResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: GraphRequest) -> GraphResult<GraphResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        Ok(GraphResponse::from_reqwest(response))
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: GraphRequest, next: Next<'_>) -> GraphResult<GraphResponse>;
}

/// The remainder of the chain after the current middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
}

impl Next<'_> {
    pub async fn run(self, request: GraphRequest) -> GraphResult<GraphResponse> {
        match self.middleware.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    middleware: rest,
                    transport: self.transport,
                };
                current.handle(request, next).await
            }
            None => self.transport.send(request).await,
        }
    }
}

pub struct Pipeline {
    transport: Arc<dyn Transport>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            middleware: Vec::new(),
        }
    }

    /// Appends `middleware` inside every middleware added before it.
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub async fn execute(&self, request: GraphRequest) -> GraphResult<GraphResponse> {
        Next {
            middleware: &self.middleware,
            transport: self.transport.as_ref(),
        }
        .run(request)
        .await
    }
}

/// Observes outbound requests. Never alters the request or the response.
#[derive(Debug, Clone, Copy)]
pub struct LoggingMiddleware {
    enabled: bool,
    separate_sink: bool,
}

impl LoggingMiddleware {
    pub fn new(enabled: bool, separate_sink: bool) -> Self {
        Self {
            enabled,
            separate_sink,
        }
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new(true, false)
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, request: GraphRequest, next: Next<'_>) -> GraphResult<GraphResponse> {
        if self.enabled {
            let uri = display_uri(&request.url);
            if self.separate_sink {
                info!(target: REQUEST_LOG_TARGET, method = %request.method, uri = %uri, "sending request");
            } else {
                debug!(method = %request.method, uri = %uri, "sending request");
            }
        }

        next.run(request).await
    }
}

/// Injects `Authorization: Bearer <token>` on every request that passes.
#[derive(Clone)]
pub struct AuthMiddleware {
    authenticator: Arc<Authenticator>,
}

impl AuthMiddleware {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut request: GraphRequest,
        next: Next<'_>,
    ) -> GraphResult<GraphResponse> {
        let token = self.authenticator.access_token().await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.secret()))
            .map_err(|_| {
                GraphError::Authentication("access token is not a valid header value".to_string())
            })?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);

        next.run(request).await
    }
}

/// Request URI as logged: percent-encoded commas from `$select` lists are
/// shown literally.
pub fn display_uri(url: &Url) -> String {
    url.as_str().replace("%2C", ",").replace("%2c", ",")
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use reqwest::header::HeaderValue;
    use reqwest::{Method, StatusCode, Url};
    use tracing_subscriber::fmt::MakeWriter;

    use super::{
        display_uri, GraphRequest, GraphResponse, LoggingMiddleware, Middleware, Next, Pipeline,
        REQUEST_LOG_TARGET,
    };
    use crate::graph::test_support::ScriptedTransport;
    use crate::graph::GraphResult;

    struct Tag {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(
            &self,
            mut request: GraphRequest,
            next: Next<'_>,
        ) -> GraphResult<GraphResponse> {
            self.seen
                .lock()
                .expect("lock seen")
                .push(self.name.to_string());
            request
                .headers
                .append("x-trace", HeaderValue::from_static(self.name));
            next.run(request).await
        }
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("lock log")).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock log").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    async fn send_logged(logger: LoggingMiddleware) -> (String, Vec<GraphRequest>) {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("GET", "/me/drive", StatusCode::OK, "{}");
        let pipeline = Pipeline::new(transport.clone()).with(logger);

        let log = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let request = GraphRequest::new(Method::GET, url("/me/drive"))
            .with_body("application/json", "{}");
        let response = pipeline.execute(request).await.expect("execute request");
        assert_eq!(response.status(), StatusCode::OK);
        (log.contents(), transport.requests())
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://graph.test/v1.0{path}")).expect("parse url")
    }

    #[tokio::test]
    async fn middleware_runs_outermost_first_before_transport() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("GET", "/ping", StatusCode::OK, "pong");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::new(transport.clone())
            .with(Tag {
                name: "outer",
                seen: seen.clone(),
            })
            .with(Tag {
                name: "inner",
                seen: seen.clone(),
            });

        let response = pipeline
            .execute(GraphRequest::new(Method::GET, url("/ping")))
            .await
            .expect("execute request");
        assert_eq!(response.text().await.expect("read body"), "pong");

        assert_eq!(*seen.lock().expect("lock seen"), vec!["outer", "inner"]);
        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        let traces: Vec<_> = sent[0]
            .headers
            .get_all("x-trace")
            .iter()
            .map(|value| value.to_str().expect("ascii header").to_string())
            .collect();
        assert_eq!(traces, vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn logging_middleware_leaves_request_and_response_untouched() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("POST", "/things", StatusCode::CREATED, "{\"id\":\"1\"}");
        let pipeline = Pipeline::new(transport.clone()).with(LoggingMiddleware::new(true, true));

        let request = GraphRequest::new(Method::POST, url("/things"))
            .with_body("application/json", "{\"name\":\"a\"}");
        let response = pipeline.execute(request).await.expect("execute request");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.text().await.expect("body"), "{\"id\":\"1\"}");

        let sent = transport.requests();
        assert_eq!(sent[0].body.as_deref(), Some(&b"{\"name\":\"a\"}"[..]));
        assert_eq!(
            sent[0].headers.get("content-type").map(|v| v.as_bytes()),
            Some(&b"application/json"[..])
        );
    }

    #[tokio::test]
    async fn disabled_logger_passes_request_through_silently() {
        let (log, sent) = send_logged(LoggingMiddleware::new(false, true)).await;
        assert!(!log.contains("sending request"));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::GET);
        assert_eq!(sent[0].url, url("/me/drive"));
        assert_eq!(sent[0].body.as_deref(), Some(&b"{}"[..]));
    }

    #[tokio::test]
    async fn separate_sink_logs_under_request_target() {
        let (log, _) = send_logged(LoggingMiddleware::new(true, true)).await;
        assert!(log.contains(REQUEST_LOG_TARGET));
        assert!(log.contains("https://graph.test/v1.0/me/drive"));

        let (log, _) = send_logged(LoggingMiddleware::default()).await;
        assert!(log.contains("sending request"));
        assert!(!log.contains(REQUEST_LOG_TARGET));
    }

    #[test]
    fn display_uri_unescapes_commas() {
        let url = Url::parse("https://graph.test/v1.0/drives/d/root/children?$select=name%2Cid")
            .expect("parse url");
        assert_eq!(
            display_uri(&url),
            "https://graph.test/v1.0/drives/d/root/children?$select=name,id"
        );
    }

    #[tokio::test]
    async fn buffered_response_streams_as_single_chunk() {
        use futures::StreamExt;

        let response = GraphResponse::new(StatusCode::OK, "abc");
        assert_eq!(response.reason(), "OK");
        let chunks: Vec<_> = response.into_stream().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().expect("chunk").as_ref(), b"abc");
    }
}
