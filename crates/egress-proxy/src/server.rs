//! Forward HTTP/HTTPS proxy.
//!
//! Built directly on `hyper`/`hyper-util` rather than `axum`: a forward
//! proxy dispatches on the request's absolute-form URI or CONNECT
//! authority, not a fixed set of server-local paths, so `axum::Router`'s
//! path-matching model doesn't fit. Other HTTP surfaces in this workspace
//! that do serve a fixed route set use axum instead; this one doesn't.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::PROXY_AUTHORIZATION;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};

use sandbox_core::token::TokenService;

use crate::auth;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
struct ProxyState {
    tokens: Arc<TokenService>,
    client: Client<HttpConnector, Incoming>,
}

/// Binds `addr` and serves the forward proxy until the process exits.
/// Each accepted connection gets its own hyper/1 connection task.
pub async fn serve(addr: SocketAddr, tokens: TokenService) -> std::io::Result<()> {
    let state = ProxyState {
        tokens: Arc::new(tokens),
        client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
    };

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "egress proxy listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, state.clone()));
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                tracing::debug!(%peer, error = %err, "connection ended with error");
            }
        });
    }
}

async fn handle(req: Request<Incoming>, state: ProxyState) -> Result<Response<BoxBody<Bytes, BoxError>>, Infallible> {
    let response = if req.method() == Method::CONNECT {
        handle_connect(req, state).await
    } else {
        handle_http(req, state).await
    };
    Ok(response)
}

async fn handle_connect(mut req: Request<Incoming>, state: ProxyState) -> Response<BoxBody<Bytes, BoxError>> {
    let Some(authority) = req.uri().authority().cloned() else {
        return text_response(StatusCode::BAD_REQUEST, "CONNECT requires an authority-form target");
    };
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(443);

    if let Err(err) = auth::authorize(&state.tokens, req.headers(), &host) {
        tracing::warn!(%host, error = %err, "CONNECT denied");
        return text_response(StatusCode::FORBIDDEN, "forbidden");
    }

    // Dial upstream before acknowledging the CONNECT, so a dead target
    // surfaces as 502 instead of a tunnel that opens and then closes.
    let target = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(%host, port, error = %err, "CONNECT upstream unreachable");
            return text_response(StatusCode::BAD_GATEWAY, "upstream unreachable");
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let mut client_io = TokioIo::new(upgraded);
                let mut server_io = target;
                if let Err(err) =
                    tokio::io::copy_bidirectional(&mut client_io, &mut server_io).await
                {
                    tracing::debug!(%host, error = %err, "tunnel closed with error");
                }
            }
            Err(err) => tracing::warn!(%host, error = %err, "CONNECT upgrade failed"),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(empty_body())
        .expect("static response always builds")
}

async fn handle_http(mut req: Request<Incoming>, state: ProxyState) -> Response<BoxBody<Bytes, BoxError>> {
    let Some(host) = req.uri().host().map(str::to_string) else {
        return text_response(StatusCode::BAD_REQUEST, "absolute-form request URI required");
    };

    if let Err(err) = auth::authorize(&state.tokens, req.headers(), &host) {
        tracing::warn!(%host, error = %err, "HTTP request denied");
        return text_response(
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            "proxy authentication required",
        );
    }

    req.headers_mut().remove(PROXY_AUTHORIZATION);

    match state.client.request(req).await {
        Ok(resp) => resp.map(|body| body.map_err(|e| Box::new(e) as BoxError).boxed()),
        Err(err) => {
            tracing::warn!(%host, error = %err, "upstream request failed");
            text_response(StatusCode::BAD_GATEWAY, "upstream error")
        }
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<BoxBody<Bytes, BoxError>> {
    Response::builder()
        .status(status)
        .body(full_body(message.to_string()))
        .expect("static response always builds")
}

fn full_body(text: String) -> BoxBody<Bytes, BoxError> {
    Full::new(Bytes::from(text))
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn empty_body() -> BoxBody<Bytes, BoxError> {
    Empty::new().map_err(|never: Infallible| match never {}).boxed()
}
