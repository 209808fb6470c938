//! Transport strategies used by [`SyncServiceClient`](crate::SyncServiceClient).
//!
//! Every request goes through an [`HttpTransport`]. Two strategies ship with
//! the crate: [`TcpTransport`] for `http`/`https` (a pooled `reqwest` client)
//! and, on Unix platforms, [`UnixTransport`](crate::unix_transport::UnixTransport)
//! for `unix`/`secure-unix`. Both return the same [`RawResponse`] and report
//! dial failures as [`Error::Connect`], so callers never special-case the
//! socket type.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Outgoing body stream
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Incoming body stream
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Body of an outgoing request
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    /// Sent chunk by chunk as it is produced
    Stream(ByteStream),
}

impl RequestBody {
    /// Serialize `value` as a JSON body
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(RequestBody::Bytes(Bytes::from(serde_json::to_vec(value)?)))
    }

    /// Stream the contents of `reader` as the body
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        RequestBody::Stream(Box::pin(ReaderStream::new(reader)))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Everything the request helper needs to issue one call.
///
/// `streaming` leaves the response body on the connection so it can be
/// consumed incrementally; otherwise the body is read fully before the
/// response is returned. `timeout` overrides the client's request timeout and
/// bounds the whole call, a streamed body included.
#[derive(Debug)]
pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    pub headers: HeaderMap,
    pub streaming: bool,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
            streaming: false,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// JSON body with the matching content type
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = RequestBody::json(value)?;
        let content_type = HeaderValue::from_str(mime::APPLICATION_JSON.as_ref())
            .map_err(|e| Error::Configuration(e.to_string()))?;
        self.headers.insert(http::header::CONTENT_TYPE, content_type);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Body of a response, either already read or still on the wire
pub enum ResponseBody {
    Buffered(Bytes),
    Streaming(ResponseStream),
}

/// Raw response handed back by a transport; status codes are not interpreted
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Read the whole body
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await?;
                Ok(Bytes::from(chunks.concat()))
            }
        }
    }

    /// Body as text, replacing invalid UTF-8
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn into_stream(self) -> ResponseStream {
        match self.body {
            ResponseBody::Streaming(stream) => stream,
            ResponseBody::Buffered(bytes) => {
                Box::pin(stream::iter((!bytes.is_empty()).then_some(Ok::<_, Error>(bytes))))
            }
        }
    }

    /// Stream the body into `writer` chunk by chunk, returning the byte count.
    /// The connection goes back to the pool once the body is exhausted.
    pub async fn copy_to<W>(self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut stream = self.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

/// A strategy for delivering requests to the Sync Service.
///
/// Implementations must be safe to call concurrently; the client shares one
/// instance between direct calls and every poller.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request and hand back the raw response
    async fn send(&self, request: RequestOptions) -> Result<RawResponse>;

    /// Short description used in logs, e.g. `tcp:host:port`
    fn describe(&self) -> String;
}

/// Parse a PEM bundle into the root certificates trusted by `reqwest`
pub(crate) fn parse_ca_bundle(pem: &str) -> Result<Vec<reqwest::Certificate>> {
    let mut reader = pem.as_bytes();
    let ders = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("invalid CA certificate: {}", e)))?;

    if ders.is_empty() {
        return Err(Error::Tls("no certificate found in CA PEM".to_string()));
    }

    ders.iter()
        .map(|der| {
            reqwest::Certificate::from_der(der.as_ref())
                .map_err(|e| Error::Tls(format!("invalid CA certificate: {}", e)))
        })
        .collect()
}

/// `http`/`https` transport backed by a pooled `reqwest::Client`
#[derive(Clone)]
pub struct TcpTransport {
    client: reqwest::Client,
    endpoint: String,
    default_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .user_agent(config.user_agent.as_str());

        if let Some(pem) = &config.ca_certificate {
            for cert in parse_ca_bundle(pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            default_timeout: config.request_timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error, timeout: Option<Duration>) -> Error {
        match timeout {
            Some(limit) if err.is_timeout() => Error::Timeout(limit),
            _ => Error::from_reqwest(&self.endpoint, err),
        }
    }
}

#[async_trait]
impl HttpTransport for TcpTransport {
    async fn send(&self, request: RequestOptions) -> Result<RawResponse> {
        let RequestOptions {
            method,
            url,
            body,
            headers,
            streaming,
            timeout,
        } = request;
        let timeout = timeout.or(self.default_timeout);

        let mut builder = self.client.request(method, url.as_str()).headers(headers);
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await.map_err(|e| self.map_error(e, timeout))?;
        let status = response.status();
        let headers = response.headers().clone();

        let body = if streaming {
            let endpoint = self.endpoint.clone();
            ResponseBody::Streaming(Box::pin(
                response
                    .bytes_stream()
                    .map_err(move |e| Error::from_reqwest(&endpoint, e)),
            ))
        } else {
            ResponseBody::Buffered(response.bytes().await.map_err(|e| self.map_error(e, timeout))?)
        };

        Ok(RawResponse::new(status, headers, body))
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffered_body_helpers() {
        let response = RawResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            ResponseBody::Buffered(Bytes::from_static(br#"["a","b"]"#)),
        );
        let users: Vec<String> = response.json().await.unwrap();
        assert_eq!(users, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_streaming_body_copy() {
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        let response = RawResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            ResponseBody::Streaming(Box::pin(stream::iter(chunks))),
        );
        let mut sink = Vec::new();
        let written = response.copy_to(&mut sink).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(sink, b"hello world");
    }

    #[tokio::test]
    async fn test_empty_buffered_stream_yields_nothing() {
        let response = RawResponse::new(StatusCode::OK, HeaderMap::new(), ResponseBody::Buffered(Bytes::new()));
        let chunks: Vec<Bytes> = response.into_stream().try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_request_options_json_sets_content_type() {
        let options = RequestOptions::put("http://localhost/x")
            .json(&serde_json::json!({"action": "add"}))
            .unwrap();
        assert_eq!(options.headers[http::header::CONTENT_TYPE], "application/json");
        assert!(matches!(options.body, RequestBody::Bytes(_)));
    }

    #[test]
    fn test_parse_ca_bundle_rejects_garbage() {
        assert!(matches!(parse_ca_bundle("not a certificate"), Err(Error::Tls(_))));
    }

    #[test]
    fn test_tcp_transport_describe() {
        let config = ClientConfig::new(crate::Protocol::Http, "ess.local", 8080);
        let transport = TcpTransport::new(&config).unwrap();
        assert_eq!(transport.describe(), "tcp:ess.local:8080");
    }
}
