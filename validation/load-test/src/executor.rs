//! HTTP execution with outcome classification and retry.

use crate::materializer::{ConcreteRequest, RequestBody};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// 2xx
    Success,
    /// 4xx
    ClientError,
    /// 5xx
    ServerError,
    /// 1xx or 3xx that the client did not follow
    UnexpectedStatus,
    Timeout,
    ConnectionError,
    /// The request could not be built or sent at all
    RequestError,
}

impl OutcomeKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => OutcomeKind::Success,
            400..=499 => OutcomeKind::ClientError,
            500..=599 => OutcomeKind::ServerError,
            _ => OutcomeKind::UnexpectedStatus,
        }
    }

    pub fn is_success(self) -> bool {
        self == OutcomeKind::Success
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, OutcomeKind::Timeout | OutcomeKind::ConnectionError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::ClientError => "client_error",
            OutcomeKind::ServerError => "server_error",
            OutcomeKind::UnexpectedStatus => "unexpected_status",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::ConnectionError => "connection_error",
            OutcomeKind::RequestError => "request_error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure below the HTTP layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid request: {0}")]
    Request(String),
}

impl TransportError {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            TransportError::Timeout(_) => OutcomeKind::Timeout,
            TransportError::Connection(_) => OutcomeKind::ConnectionError,
            TransportError::Request(_) => OutcomeKind::RequestError,
        }
    }
}

/// A response that made it back from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub bytes: usize,
    pub body: Option<String>,
}

/// Sends one request attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(
        &self,
        request: &ConcreteRequest,
        timeout: Duration,
        capture_body: bool,
    ) -> Result<TransportResponse, TransportError>;
}

/// Transport backed by a pooled `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, pool_size: usize) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("api-load-test/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(pool_size)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Join base URL and path with exactly one slash between them.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn build(
        &self,
        request: &ConcreteRequest,
        timeout: Duration,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Request(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Request(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(method, self.url_for(&request.path))
            .timeout(timeout)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            None => builder,
        };
        Ok(builder)
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_builder() {
        TransportError::Request(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &ConcreteRequest,
        timeout: Duration,
        capture_body: bool,
    ) -> Result<TransportResponse, TransportError> {
        let response = self.build(request, timeout)?.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;

        Ok(TransportResponse {
            status,
            bytes: body.len(),
            body: capture_body.then(|| String::from_utf8_lossy(&body).into_owned()),
        })
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Finish,
    Retry(Duration),
}

/// Fixed-delay retry for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Decide the next step given the attempts made so far and how the last
    /// one ended.
    pub fn next_step(&self, attempts: u32, kind: OutcomeKind) -> Step {
        if kind.is_retryable() && attempts <= self.max_retries {
            Step::Retry(self.retry_delay)
        } else {
            Step::Finish
        }
    }
}

/// Final result of a request after retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub kind: OutcomeKind,
    pub status: Option<u16>,
    /// Latency of the last attempt only
    pub latency: Duration,
    pub attempts: u32,
    pub bytes: usize,
    pub error: Option<String>,
    pub body: Option<String>,
}

/// Runs requests through a transport under a retry policy.
pub struct Executor<T> {
    transport: Arc<T>,
    policy: RetryPolicy,
    capture_body: bool,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            policy: self.policy,
            capture_body: self.capture_body,
        }
    }
}

impl<T: Transport> Executor<T> {
    pub fn new(transport: Arc<T>, policy: RetryPolicy, capture_body: bool) -> Self {
        Self {
            transport,
            policy,
            capture_body,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, retrying timeouts and connection failures.
    pub async fn execute(&self, request: &ConcreteRequest, timeout: Duration) -> Execution {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let start = Instant::now();
            let result = self.transport.send(request, timeout, self.capture_body).await;
            let latency = start.elapsed();

            let execution = match result {
                Ok(response) => Execution {
                    kind: OutcomeKind::from_status(response.status),
                    status: Some(response.status),
                    latency,
                    attempts,
                    bytes: response.bytes,
                    error: None,
                    body: response.body,
                },
                Err(e) => Execution {
                    kind: e.kind(),
                    status: None,
                    latency,
                    attempts,
                    bytes: 0,
                    error: Some(e.to_string()),
                    body: None,
                },
            };

            debug!(
                endpoint = %request.endpoint,
                path = %request.path,
                kind = %execution.kind,
                attempt = attempts,
                latency_ms = latency.as_secs_f64() * 1000.0,
                "Request finished"
            );

            match self.policy.next_step(attempts, execution.kind) {
                Step::Finish => return execution,
                Step::Retry(delay) => {
                    warn!(
                        endpoint = %request.endpoint,
                        attempt = attempts,
                        max_retries = self.policy.max_retries,
                        error = execution.error.as_deref().unwrap_or_default(),
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error a fixed number of times, then answers 200.
    struct Flaky {
        failures: u32,
        error: TransportError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: TransportError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn send(
            &self,
            _request: &ConcreteRequest,
            _timeout: Duration,
            _capture_body: bool,
        ) -> Result<TransportResponse, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(TransportResponse {
                    status: 200,
                    bytes: 2,
                    body: None,
                })
            }
        }
    }

    struct Status(u16);

    #[async_trait]
    impl Transport for Status {
        async fn send(
            &self,
            _request: &ConcreteRequest,
            _timeout: Duration,
            _capture_body: bool,
        ) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: self.0,
                bytes: 0,
                body: None,
            })
        }
    }

    fn request() -> ConcreteRequest {
        ConcreteRequest {
            endpoint: "Get Item".to_string(),
            method: "GET".to_string(),
            path: "/items/1".to_string(),
            query: vec![],
            headers: vec![],
            body: None,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1))
    }

    #[test]
    fn test_classification() {
        assert_eq!(OutcomeKind::from_status(204), OutcomeKind::Success);
        assert_eq!(OutcomeKind::from_status(404), OutcomeKind::ClientError);
        assert_eq!(OutcomeKind::from_status(503), OutcomeKind::ServerError);
        assert_eq!(OutcomeKind::from_status(302), OutcomeKind::UnexpectedStatus);
        assert_eq!(OutcomeKind::from_status(101), OutcomeKind::UnexpectedStatus);
    }

    #[test]
    fn test_next_step() {
        let policy = policy();
        assert_eq!(
            policy.next_step(1, OutcomeKind::Timeout),
            Step::Retry(Duration::from_millis(1))
        );
        assert_eq!(
            policy.next_step(2, OutcomeKind::ConnectionError),
            Step::Retry(Duration::from_millis(1))
        );
        assert_eq!(policy.next_step(3, OutcomeKind::Timeout), Step::Finish);
        assert_eq!(policy.next_step(1, OutcomeKind::ServerError), Step::Finish);
        assert_eq!(policy.next_step(1, OutcomeKind::RequestError), Step::Finish);
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO).next_step(1, OutcomeKind::Timeout),
            Step::Finish
        );
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let transport = Arc::new(Flaky::new(
            2,
            TransportError::Connection("refused".to_string()),
        ));
        let executor = Executor::new(transport.clone(), policy(), false);
        let execution = executor.execute(&request(), Duration::from_secs(1)).await;

        assert_eq!(execution.kind, OutcomeKind::Success);
        assert_eq!(execution.attempts, 3);
        assert_eq!(execution.status, Some(200));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_retries() {
        let transport = Arc::new(Flaky::new(
            u32::MAX,
            TransportError::Timeout("deadline".to_string()),
        ));
        let executor = Executor::new(transport.clone(), policy(), false);
        let execution = executor.execute(&request(), Duration::from_secs(1)).await;

        assert_eq!(execution.kind, OutcomeKind::Timeout);
        assert_eq!(execution.attempts, 3);
        assert!(execution.error.unwrap().contains("deadline"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_http_errors_are_not_retried() {
        for status in [400, 500] {
            let executor = Executor::new(Arc::new(Status(status)), policy(), false);
            let execution = executor.execute(&request(), Duration::from_secs(1)).await;
            assert_eq!(execution.attempts, 1);
            assert_eq!(execution.status, Some(status));
            assert!(!execution.kind.is_success());
        }
    }

    #[tokio::test]
    async fn test_request_errors_are_not_retried() {
        let transport = Arc::new(Flaky::new(
            u32::MAX,
            TransportError::Request("bad header".to_string()),
        ));
        let executor = Executor::new(transport, policy(), false);
        let execution = executor.execute(&request(), Duration::from_secs(1)).await;
        assert_eq!(execution.kind, OutcomeKind::RequestError);
        assert_eq!(execution.attempts, 1);
    }

    #[test]
    fn test_url_join() {
        let transport = HttpTransport::new("http://localhost:8000/", 4).unwrap();
        assert_eq!(transport.url_for("/items"), "http://localhost:8000/items");
        assert_eq!(transport.url_for("items"), "http://localhost:8000/items");
    }
}
