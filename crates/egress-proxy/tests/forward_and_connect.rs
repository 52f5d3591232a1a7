//! End-to-end exercise of the egress proxy against a local TCP fixture
//! standing in for "upstream". Covers proxy allow/deny behavior for both
//! plain HTTP forwarding and `CONNECT` tunnels: a session token scoped to
//! one host is honored for that host and rejected for everything else.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use egress_proxy::server;
use sandbox_core::token::TokenService;

/// A minimal HTTP/1.1 upstream that always answers `200 it-worked`, used as
/// the "real" destination the proxy forwards plain HTTP requests to.
async fn spawn_upstream() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(|_req: Request<hyper::body::Incoming>| async {
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from("it-worked"))))
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    addr
}

async fn spawn_proxy(tokens: TokenService) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    tokio::spawn(async move {
        let _ = server::serve(addr, tokens).await;
    });

    // Give the proxy's listener a moment to bind before tests dial it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

async fn raw_request(proxy_addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();

    let mut response = Vec::new();
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        stream.read_to_end(&mut response),
    )
    .await;
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn http_forward_with_valid_token_reaches_upstream() {
    let tokens = TokenService::new(b"shared-secret".to_vec());
    let upstream_addr = spawn_upstream().await;
    let proxy_addr = spawn_proxy(tokens.clone()).await;

    let host = upstream_addr.ip().to_string();
    let token = tokens.issue(
        "s1",
        &[host.clone()],
        chrono::Utc::now(),
        chrono::Duration::seconds(60),
    );

    let request = format!(
        "GET http://{upstream_addr}/ HTTP/1.1\r\nHost: {upstream_addr}\r\nProxy-Authorization: Bearer {token}\r\nConnection: close\r\n\r\n"
    );
    let response = raw_request(proxy_addr, &request).await;

    assert!(response.starts_with("HTTP/1.1 200"), "response: {response}");
    assert!(response.contains("it-worked"));
}

#[tokio::test]
async fn http_forward_without_token_is_rejected_before_reaching_upstream() {
    let tokens = TokenService::new(b"shared-secret".to_vec());
    let upstream_addr = spawn_upstream().await;
    let proxy_addr = spawn_proxy(tokens).await;

    let request = format!(
        "GET http://{upstream_addr}/ HTTP/1.1\r\nHost: {upstream_addr}\r\nConnection: close\r\n\r\n"
    );
    let response = raw_request(proxy_addr, &request).await;

    assert!(
        response.starts_with("HTTP/1.1 407"),
        "response: {response}"
    );
    assert!(!response.contains("it-worked"));
}

#[tokio::test]
async fn http_forward_for_host_outside_allowlist_is_rejected() {
    let tokens = TokenService::new(b"shared-secret".to_vec());
    let upstream_addr = spawn_upstream().await;
    let proxy_addr = spawn_proxy(tokens.clone()).await;

    // Token is valid but scoped to a host the request does not target.
    let token = tokens.issue(
        "s1",
        &["example.com".to_string()],
        chrono::Utc::now(),
        chrono::Duration::seconds(60),
    );

    let request = format!(
        "GET http://{upstream_addr}/ HTTP/1.1\r\nHost: {upstream_addr}\r\nProxy-Authorization: Bearer {token}\r\nConnection: close\r\n\r\n"
    );
    let response = raw_request(proxy_addr, &request).await;

    assert!(
        response.starts_with("HTTP/1.1 407"),
        "response: {response}"
    );
}

#[tokio::test]
async fn connect_tunnel_with_valid_token_splices_raw_bytes() {
    let tokens = TokenService::new(b"shared-secret".to_vec());

    // A bare TCP echo server standing in for a TLS-terminated target: the
    // proxy never looks inside a CONNECT tunnel's bytes.
    let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo_listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = echo_listener.accept().await {
            let mut buf = [0u8; 5];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
            }
        }
    });

    let proxy_addr = spawn_proxy(tokens.clone()).await;
    let host = echo_addr.ip().to_string();
    let token = tokens.issue(
        "s1",
        &[host],
        chrono::Utc::now(),
        chrono::Duration::seconds(60),
    );

    let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
    let connect_req = format!(
        "CONNECT {echo_addr} HTTP/1.1\r\nHost: {echo_addr}\r\nProxy-Authorization: Bearer {token}\r\n\r\n"
    );
    stream.write_all(connect_req.as_bytes()).await.unwrap();

    let mut header_buf = [0u8; 256];
    let n = stream.read(&mut header_buf).await.unwrap();
    let header = String::from_utf8_lossy(&header_buf[..n]);
    assert!(header.starts_with("HTTP/1.1 200"), "header: {header}");

    stream.write_all(b"ping!").await.unwrap();
    let mut echoed = [0u8; 5];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping!");
}

#[tokio::test]
async fn connect_tunnel_without_token_is_forbidden() {
    let tokens = TokenService::new(b"shared-secret".to_vec());
    let proxy_addr = spawn_proxy(tokens).await;

    let request = "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
    let response = raw_request(proxy_addr, request).await;

    assert!(
        response.starts_with("HTTP/1.1 403"),
        "response: {response}"
    );
}
