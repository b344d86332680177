//! Outbound HTTP requests on behalf of a provider.
//!
//! `RequestExecutor` merges a provider's default headers with per-request
//! ones, dispatches through a `Transport`, and turns a status outside the
//! caller's `expects` set into a typed provider error. It never retries.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use unistore_common::{Error, ProviderErrorKind, Result};

use crate::provider::ByteStream;
use crate::urls::build_url;

/// Body of an outbound request.
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Json(serde_json::Value),
    Stream(ByteStream),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Json(v) => write!(f, "Json({})", v),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A fully prepared request handed to the transport.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
}

/// Response returned by the transport. The body is not read until asked.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl HttpResponse {
    /// Read the whole body.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }

    pub fn into_stream(self) -> ByteStream {
        self.body
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends requests over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// `Transport` backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("unistore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|result| result.map_err(|e| Error::Network(format!("Stream read error: {}", e))));

        Ok(HttpResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

/// Per-request options for `RequestExecutor::make_request`.
#[derive(Debug, Default)]
pub struct RequestOptions {
    headers: Vec<(String, Option<String>)>,
    expects: Option<Vec<u16>>,
    throws: ProviderErrorKind,
    body: RequestBody,
    timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, overriding any default of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), Some(value.into())));
        self
    }

    /// Suppress a header, including a default one.
    pub fn unset_header(mut self, name: impl Into<String>) -> Self {
        self.headers.push((name.into(), None));
        self
    }

    /// Acceptable response statuses. Anything else fails with `throws`.
    pub fn expects(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.expects = Some(statuses.into_iter().collect());
        self
    }

    /// Error kind raised for an unexpected status.
    pub fn throws(mut self, kind: ProviderErrorKind) -> Self {
        self.throws = kind;
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn json(self, value: serde_json::Value) -> Self {
        self.body(RequestBody::Json(value))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Issues requests for one provider instance.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    base_url: String,
    default_headers: Vec<(String, Option<String>)>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            default_headers: Vec::new(),
        }
    }

    /// Add a header sent with every request. A `None` value is never sent.
    pub fn with_default_header(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.default_headers.push((name.into(), value));
        self
    }

    /// Build a URL under this executor's base URL.
    pub fn build_url<S: AsRef<str>>(&self, segments: &[S], query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.base_url, segments, query)
    }

    /// Merge default headers with `overrides` and drop `None` values.
    ///
    /// Header names compare case-insensitively; a later entry wins.
    pub fn build_headers(&self, overrides: &[(String, Option<String>)]) -> Result<HeaderMap> {
        let mut merged: BTreeMap<String, Option<String>> = BTreeMap::new();
        for (name, value) in self.default_headers.iter().chain(overrides) {
            merged.insert(name.to_ascii_lowercase(), value.clone());
        }

        let mut headers = HeaderMap::new();
        for (name, value) in merged {
            let Some(value) = value else { continue };
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidInput(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| Error::InvalidInput(format!("Invalid value for header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Send a request and validate its status.
    ///
    /// Without `expects`, the response is returned whatever its status.
    ///
    /// # Errors
    /// - `Error::Provider` of kind `throws` when `expects` is set and the
    ///   status is not in it
    /// - Transport failures, unchanged
    pub async fn make_request(
        &self,
        method: Method,
        url: Url,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let RequestOptions {
            headers,
            expects,
            throws,
            body,
            timeout,
        } = options;

        let headers = self.build_headers(&headers)?;
        debug!(%method, %url, "dispatching request");

        let response = self
            .transport
            .send(HttpRequest {
                method,
                url,
                headers,
                body,
                timeout,
            })
            .await?;

        match expects {
            Some(expects) if !expects.is_empty() => {
                let status = response.status.as_u16();
                if !expects.contains(&status) {
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::from_response(throws, status, &body));
                }
            }
            _ => {}
        }

        Ok(response)
    }
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Transport that records requests and answers with a fixed status.
    struct Recording {
        status: u16,
        body: &'static str,
        seen: Mutex<Vec<(Method, String, HeaderMap)>>,
    }

    impl Recording {
        fn new(status: u16, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((request.method, request.url.to_string(), request.headers));
            Ok(HttpResponse {
                status: StatusCode::from_u16(self.status).unwrap(),
                headers: HeaderMap::new(),
                body: Box::pin(stream::iter(vec![Ok(Bytes::from_static(self.body.as_bytes()))])),
            })
        }
    }

    fn executor(transport: Arc<dyn Transport>) -> RequestExecutor {
        RequestExecutor::new(transport, "https://api.example.com/v1/")
            .with_default_header("Authorization", Some("Bearer default".to_string()))
            .with_default_header("X-Trace", None)
            .with_default_header("Accept", Some("application/json".to_string()))
    }

    #[test]
    fn test_build_headers_override_and_drop() {
        let exec = executor(Recording::new(200, ""));
        let headers = exec
            .build_headers(&[
                ("authorization".to_string(), Some("Bearer override".to_string())),
                ("Accept".to_string(), None),
                ("X-Extra".to_string(), Some("1".to_string())),
            ])
            .unwrap();

        assert_eq!(headers["authorization"], "Bearer override");
        assert_eq!(headers["x-extra"], "1");
        assert!(!headers.contains_key("accept"));
        assert!(!headers.contains_key("x-trace"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_build_headers_rejects_invalid_name() {
        let exec = executor(Recording::new(200, ""));
        let result = exec.build_headers(&[("bad header".to_string(), Some("x".to_string()))]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_unexpected_status_raises_throws_kind() {
        let transport = Recording::new(404, r#"{"message": "no such file"}"#);
        let exec = executor(transport.clone());
        let url = exec.build_url(&["files", "abc"], &[]).unwrap();

        let err = exec
            .make_request(
                Method::GET,
                url,
                RequestOptions::new()
                    .expects([200])
                    .throws(ProviderErrorKind::Metadata),
            )
            .await
            .unwrap_err();

        match err {
            Error::Provider {
                kind,
                status,
                message,
            } => {
                assert_eq!(kind, ProviderErrorKind::Metadata);
                assert_eq!(status, 404);
                assert_eq!(message, "no such file");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].1, "https://api.example.com/v1/files/abc");
        assert_eq!(seen[0].2["authorization"], "Bearer default");
    }

    #[tokio::test]
    async fn test_default_throws_is_generic() {
        let exec = executor(Recording::new(500, "oops"));
        let url = exec.build_url(&["x"], &[]).unwrap();

        let err = exec
            .make_request(Method::GET, url, RequestOptions::new().expects([200, 201]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Provider {
                kind: ProviderErrorKind::Generic,
                status: 500,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_without_expects_any_status_is_returned() {
        let exec = executor(Recording::new(404, "missing"));
        let url = exec.build_url(&["x"], &[]).unwrap();

        let response = exec
            .make_request(Method::GET, url, RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "missing");
    }

    #[tokio::test]
    async fn test_reqwest_transport_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/files/abc"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "abc"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/files/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let transport = Arc::new(ReqwestTransport::new().unwrap());
        let exec = RequestExecutor::new(transport, format!("{}/v1", server.uri()))
            .with_default_header("Authorization", Some("Bearer secret".to_string()));

        let url = exec.build_url(&["files", "abc"], &[]).unwrap();
        let response = exec
            .make_request(Method::GET, url, RequestOptions::new().expects([200]))
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["id"], "abc");

        let url = exec.build_url(&["files", "gone"], &[]).unwrap();
        let err = exec
            .make_request(
                Method::DELETE,
                url,
                RequestOptions::new()
                    .expects([204])
                    .throws(ProviderErrorKind::Delete),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Provider {
                kind: ProviderErrorKind::Delete,
                status: 404,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_streaming_body_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let exec = RequestExecutor::new(Arc::new(ReqwestTransport::new().unwrap()), server.uri());
        let body: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));

        let url = exec.build_url(&["upload"], &[]).unwrap();
        let response = exec
            .make_request(
                Method::PUT,
                url,
                RequestOptions::new()
                    .body(RequestBody::Stream(body))
                    .expects([201]),
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::CREATED);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body, b"hello world");
    }
}
