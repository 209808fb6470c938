#![cfg(unix)]
// Tests for the Unix domain socket transport against a hyper server bound to
// a socket in a temporary directory.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use wiremock::{Mock, MockServer, ResponseTemplate};

use sync_service_client::config::socket_authority;
use sync_service_client::{Error, ObjectMetadata, Protocol, SyncServiceClient};

// ── Test server ─────────────────────────────────────────────────────

#[derive(Default)]
struct EssState {
    data: Mutex<HashMap<String, Bytes>>,
    hosts: Mutex<Vec<String>>,
    auth: Mutex<Vec<String>>,
    requests: AtomicUsize,
}

async fn handle(req: Request<Incoming>, state: Arc<EssState>) -> Result<Response<Full<Bytes>>, Infallible> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let header = |name: hyper::header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    state.hosts.lock().unwrap().push(header(hyper::header::HOST));
    state.auth.lock().unwrap().push(header(hyper::header::AUTHORIZATION));

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::PUT, p) if p.ends_with("/data") => {
            let body = req.into_body().collect().await.unwrap().to_bytes();
            state.data.lock().unwrap().insert(p.to_string(), body);
            Response::builder().status(StatusCode::NO_CONTENT).body(Full::default())
        }
        (Method::GET, p) if p.ends_with("/data") => match state.data.lock().unwrap().get(p) {
            Some(body) => Response::builder().status(StatusCode::OK).body(Full::new(body.clone())),
            None => Response::builder().status(StatusCode::NOT_FOUND).body(Full::default()),
        },
        (Method::GET, "/api/v1/objects/model") => {
            let body = json!([{"objectID": "v1", "objectType": "model"}]).to_string();
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from(body)))
        }
        (Method::PUT, "/api/v1/objects/model/v1/consumed") => {
            Response::builder().status(StatusCode::NO_CONTENT).body(Full::default())
        }
        _ => Response::builder().status(StatusCode::NOT_FOUND).body(Full::default()),
    };
    Ok(response.unwrap())
}

async fn start_ess() -> (TempDir, String, Arc<EssState>) {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("ess.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let state = Arc::new(EssState::default());

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let state = Arc::clone(&server_state);
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(req, Arc::clone(&state)));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (dir, socket.to_string_lossy().into_owned(), state)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_data_roundtrip_over_socket() {
    let (_dir, socket, state) = start_ess().await;
    let client = SyncServiceClient::new(Protocol::Unix, &socket, 0).unwrap();

    for (id, len) in [("empty", 0), ("small", 17), ("large", 3 * 1024 * 1024 + 5)] {
        let meta = ObjectMetadata::new("model", id);
        let data = payload(len);

        client
            .update_object_data(&meta, std::io::Cursor::new(data.clone()))
            .await
            .unwrap();

        let mut sink = Vec::new();
        let written = client.fetch_object_data(&meta, &mut sink).await.unwrap();
        assert_eq!(written, Some(len as u64), "object {id}");
        assert_eq!(sink, data, "object {id}");
    }

    assert_eq!(state.requests.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_missing_data_over_socket() {
    let (_dir, socket, _state) = start_ess().await;
    let client = SyncServiceClient::new(Protocol::Unix, &socket, 0).unwrap();

    let bytes = client
        .fetch_object_data_bytes(&ObjectMetadata::new("model", "nothing"))
        .await
        .unwrap();
    assert!(bytes.is_none());
}

#[tokio::test]
async fn test_secure_unix_sends_credentials_and_socket_authority() {
    let (_dir, socket, state) = start_ess().await;
    let mut client = SyncServiceClient::new(Protocol::SecureUnix, &socket, 0).unwrap();
    client
        .set_app_key_and_secret("app", SecretString::from("pw".to_string()))
        .unwrap();

    let updates = client.get_updated_objects("model", false).await.unwrap();
    assert_eq!(updates.len(), 1);
    client.mark_object_consumed(&updates[0]).await.unwrap();

    let hosts = state.hosts.lock().unwrap().clone();
    assert!(hosts.iter().all(|h| *h == socket_authority(&socket)));
    let auth = state.auth.lock().unwrap().clone();
    assert!(auth.iter().all(|a| a.starts_with("Basic ")));
    assert_eq!(client.transport().describe(), format!("secure-unix:{socket}"));
}

#[tokio::test]
async fn test_socket_client_never_dials_tcp() {
    let (_dir, socket, state) = start_ess().await;

    let tcp = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&tcp)
        .await;

    // same port as the TCP listener; only the socket path may be used
    let client = SyncServiceClient::builder()
        .protocol(Protocol::Unix)
        .address(socket.as_str())
        .port(tcp.address().port())
        .build()
        .unwrap();

    for _ in 0..3 {
        client.get_updated_objects("model", true).await.unwrap();
    }
    client.get_destinations().await.unwrap();

    assert_eq!(state.requests.load(Ordering::SeqCst), 4);
    assert!(tcp.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_socket_requests() {
    let (_dir, socket, state) = start_ess().await;
    let client = SyncServiceClient::new(Protocol::Unix, &socket, 0).unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get_updated_objects("model", false).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().len(), 1);
    }
    assert_eq!(state.requests.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn test_missing_socket_reports_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("absent.sock");
    let client = SyncServiceClient::new(Protocol::Unix, socket.to_string_lossy(), 0).unwrap();

    let err = client.get_object_metadata("model", "v1").await.unwrap_err();
    assert!(err.is_connect(), "expected connect error, got: {err:?}");
    match err {
        Error::Connect { endpoint, .. } => assert!(endpoint.contains(socket.to_str().unwrap())),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!Path::new(&socket).exists());
}

#[tokio::test]
async fn test_request_timeout_covers_streamed_body() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("stall.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    // headers and a first chunk arrive promptly, the rest never does
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1024\r\n\r\nfirst")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let client = SyncServiceClient::builder()
        .protocol(Protocol::Unix)
        .address(socket.to_string_lossy())
        .request_timeout(Duration::from_millis(300))
        .build()
        .unwrap();

    let mut sink = Vec::new();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        client.fetch_object_data(&ObjectMetadata::new("model", "slow"), &mut sink),
    )
    .await
    .expect("streamed body was not bounded by the request timeout")
    .unwrap_err();
    assert!(matches!(err, Error::Timeout(limit) if limit == Duration::from_millis(300)), "got {err:?}");
}
