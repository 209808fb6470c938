//! HTTP over Unix domain sockets.
//!
//! The pooled hyper-util client is given a [`UnixConnector`] bound to one
//! socket path. Request URLs carry the protocol scheme (`unix` or
//! `secure-unix`) and the hex-encoded socket path as their authority, so the
//! pool keys connections by (scheme, socket path) and never confuses them
//! with a TCP endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use futures::{StreamExt, TryStreamExt};
use http::Uri;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::time::Instant;
use tracing::trace;

use crate::config::{socket_authority, ClientConfig, Protocol};
use crate::error::{Error, Result};
use crate::transport::{HttpTransport, RawResponse, RequestBody, RequestOptions, ResponseBody};

type UnixBody = UnsyncBoxBody<Bytes, io::Error>;

/// Connection factory that dials a fixed socket path
#[derive(Debug, Clone)]
pub struct UnixConnector {
    socket_path: Arc<PathBuf>,
    authority: Arc<str>,
    connect_timeout: Duration,
}

impl UnixConnector {
    pub fn new(socket_path: &str, connect_timeout: Duration) -> Self {
        Self {
            socket_path: Arc::new(PathBuf::from(socket_path)),
            authority: socket_authority(socket_path).into(),
            connect_timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl tower_service::Service<Uri> for UnixConnector {
    type Response = UnixConnection;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<UnixConnection>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let path = Arc::clone(&self.socket_path);
        let expected = Arc::clone(&self.authority);
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            match uri.authority() {
                Some(authority) if authority.as_str() == &*expected => {}
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{:?} does not address socket {}", other, path.display()),
                    ))
                }
            }

            trace!(socket = %path.display(), "dialing unix socket");
            let stream = tokio::time::timeout(connect_timeout, UnixStream::connect(path.as_path()))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connecting to {} timed out after {:?}", path.display(), connect_timeout),
                    )
                })??;

            Ok(UnixConnection {
                io: TokioIo::new(stream),
            })
        })
    }
}

/// A pooled connection over a Unix domain socket
#[derive(Debug)]
pub struct UnixConnection {
    io: TokioIo<UnixStream>,
}

impl Connection for UnixConnection {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for UnixConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.get_mut().io), cx, buf)
    }
}

impl hyper::rt::Write for UnixConnection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.get_mut().io), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.get_mut().io), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.get_mut().io), cx)
    }
}

fn infallible(never: Infallible) -> io::Error {
    match never {}
}

/// `unix`/`secure-unix` transport backed by a pooled hyper-util client
#[derive(Clone)]
pub struct UnixTransport {
    client: Client<UnixConnector, UnixBody>,
    protocol: Protocol,
    socket_path: PathBuf,
    base_url: String,
    user_agent: String,
    default_timeout: Option<Duration>,
}

impl UnixTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if !config.protocol.is_unix() {
            return Err(Error::Configuration(format!(
                "protocol {} cannot use a unix socket transport",
                config.protocol
            )));
        }

        let connector = UnixConnector::new(&config.address, config.connect_timeout);
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(connector);

        Ok(Self {
            client,
            protocol: config.protocol,
            socket_path: PathBuf::from(&config.address),
            base_url: config.base_url(),
            user_agent: config.user_agent.clone(),
            default_timeout: config.request_timeout,
        })
    }

    /// Base URL (`scheme://authority`) that routes to this socket
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.protocol.scheme(), self.socket_path.display())
    }

    fn map_error(&self, err: hyper_util::client::legacy::Error) -> Error {
        if err.is_connect() {
            Error::Connect {
                endpoint: self.endpoint(),
                source: Box::new(err),
            }
        } else {
            Error::Transport(Box::new(err))
        }
    }

    async fn exchange(
        &self,
        request: http::Request<UnixBody>,
        streaming: bool,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<RawResponse> {
        let response = self.client.request(request).await.map_err(|e| self.map_error(e))?;
        let (parts, incoming) = response.into_parts();

        let body = if streaming {
            let data = incoming
                .into_data_stream()
                .map_err(|e| Error::Transport(Box::new(e)));
            match deadline {
                Some((at, limit)) => ResponseBody::Streaming(Box::pin(with_deadline(data, at, limit))),
                None => ResponseBody::Streaming(Box::pin(data)),
            }
        } else {
            let collected = incoming
                .collect()
                .await
                .map_err(|e| Error::Transport(Box::new(e)))?;
            ResponseBody::Buffered(collected.to_bytes())
        };

        Ok(RawResponse::new(parts.status, parts.headers, body))
    }
}

/// Fails the stream with [`Error::Timeout`] once `deadline` passes
fn with_deadline<S>(data: S, deadline: Instant, limit: Duration) -> impl Stream<Item = Result<Bytes>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin,
{
    stream::unfold(Some(data), move |state| async move {
        let mut data = state?;
        match tokio::time::timeout_at(deadline, data.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(data))),
            Ok(None) => None,
            Err(_) => Some((Err(Error::Timeout(limit)), None)),
        }
    })
}

#[async_trait]
impl HttpTransport for UnixTransport {
    async fn send(&self, request: RequestOptions) -> Result<RawResponse> {
        let RequestOptions {
            method,
            url,
            body,
            headers,
            streaming,
            timeout,
        } = request;

        let uri: Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| Error::InvalidUrl(format!("{}: {}", url, e)))?;

        let body: UnixBody = match body {
            RequestBody::Empty => Empty::<Bytes>::new().map_err(infallible).boxed_unsync(),
            RequestBody::Bytes(bytes) => Full::new(bytes).map_err(infallible).boxed_unsync(),
            RequestBody::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
        };

        let mut builder = http::Request::builder()
            .method(method)
            .uri(uri)
            .header(http::header::USER_AGENT, self.user_agent.as_str());
        if let Some(map) = builder.headers_mut() {
            map.extend(headers);
        }
        let request = builder.body(body)?;

        // the limit covers the whole request, including a streamed body
        match timeout.or(self.default_timeout) {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                tokio::time::timeout_at(deadline, self.exchange(request, streaming, Some((deadline, limit))))
                    .await
                    .map_err(|_| Error::Timeout(limit))?
            }
            None => self.exchange(request, streaming, None).await,
        }
    }

    fn describe(&self) -> String {
        self.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_uses_protocol_scheme() {
        let config = ClientConfig::new(Protocol::SecureUnix, "/tmp/a", 0);
        let transport = UnixTransport::new(&config).unwrap();
        assert_eq!(transport.base_url(), "secure-unix://2f746d702f61");
        assert_eq!(transport.describe(), "secure-unix:/tmp/a");
    }

    #[test]
    fn test_rejects_network_protocol() {
        let config = ClientConfig::new(Protocol::Http, "/tmp/a", 0);
        assert!(UnixTransport::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_connector_rejects_foreign_authority() {
        use tower_service::Service;

        let mut connector = UnixConnector::new("/tmp/a", Duration::from_secs(1));
        let uri: Uri = "unix://6f74686572/api".parse().unwrap();
        let err = connector.call(uri).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_missing_socket_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let config = ClientConfig::new(Protocol::Unix, path.to_string_lossy(), 0);
        let transport = UnixTransport::new(&config).unwrap();

        let url = format!("{}/api/v1/objects/t", transport.base_url());
        let err = transport.send(RequestOptions::get(url)).await.unwrap_err();
        assert!(err.is_connect(), "expected connect error, got {err:?}");
    }
}
