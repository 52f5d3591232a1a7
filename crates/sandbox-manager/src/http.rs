//! Thin JSON/HTTP front-end: a plain `axum::Router` exposing session
//! lifecycle and exec operations to whatever external caller starts a
//! sandbox session on a user's behalf.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use sandbox_core::error::ManagerError;

use crate::manager::SandboxManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxManager>,
}

pub fn router(manager: Arc<SandboxManager>) -> Router {
    Router::new()
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/{id}", delete(destroy_session))
        .route("/v1/sessions/{id}/exec", post(exec))
        .route("/v1/sessions/{id}/exec_stream", post(exec_stream))
        .route("/v1/sessions/{id}/files/write", post(write_file))
        .route("/v1/sessions/{id}/files/read", post(read_file))
        .route("/v1/sessions/{id}/pip_install", post(pip_install))
        .route("/healthz", get(healthz))
        .with_state(AppState { manager })
}

/// Binds and serves the front-end until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    manager: Arc<SandboxManager>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(manager);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "front-end listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn healthz() -> &'static str {
    "ok"
}

fn map_error(err: ManagerError) -> Response {
    let status = match &err {
        ManagerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ManagerError::SandboxStartup { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ManagerError::AgentUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ManagerError::ExecTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ManagerError::FileError(_) => StatusCode::BAD_REQUEST,
        ManagerError::AllowlistViolation(_) => StatusCode::FORBIDDEN,
        ManagerError::Token(_) => StatusCode::UNAUTHORIZED,
        ManagerError::Runtime(_) | ManagerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    session_id: Option<String>,
    tenant_id: Option<String>,
    #[serde(default)]
    allowed_hosts: Vec<String>,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session: sandbox_core::session::SessionInfo,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let hosts = (!req.allowed_hosts.is_empty()).then_some(req.allowed_hosts);
    match state
        .manager
        .create_session(req.session_id, req.tenant_id, hosts)
        .await
    {
        Ok(session) => Json(CreateSessionResponse { session }).into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Serialize)]
struct DestroySessionResponse {
    success: bool,
}

async fn destroy_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let success = state.manager.destroy_session(&id).await;
    Json(DestroySessionResponse { success }).into_response()
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<sandbox_core::session::SessionInfo>,
}

async fn list_sessions(State(state): State<AppState>) -> Response {
    let sessions = state.manager.list_sessions().await;
    Json(ListSessionsResponse { sessions }).into_response()
}

#[derive(Deserialize)]
struct ExecRequest {
    command: String,
    timeout_secs: Option<u64>,
    workdir: Option<String>,
}

async fn exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecRequest>,
) -> Response {
    let timeout = req.timeout_secs.map(Duration::from_secs);
    match state
        .manager
        .exec(&id, &req.command, timeout, req.workdir.as_deref())
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
struct ExecStreamRequest {
    command: String,
    workdir: Option<String>,
}

async fn exec_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecStreamRequest>,
) -> Response {
    let stream = match state
        .manager
        .exec_stream(&id, &req.command, req.workdir.as_deref())
        .await
    {
        Ok(stream) => stream,
        Err(e) => return map_error(e),
    };

    let body_stream = stream.map(|chunk| {
        let mut line = serde_json::to_string(&chunk).expect("chunk always serializes");
        line.push('\n');
        Ok::<_, std::io::Error>(bytes::Bytes::from(line))
    });

    axum::body::Body::from_stream(body_stream).into_response()
}

#[derive(Deserialize)]
struct WriteFileRequest {
    path: String,
    content: String,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "w".to_string()
}

#[derive(Serialize)]
struct WriteFileResponse {
    success: bool,
    error: Option<String>,
}

async fn write_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WriteFileRequest>,
) -> Response {
    match state
        .manager
        .write_file(&id, &req.path, &req.content, &req.mode)
        .await
    {
        Ok(()) => Json(WriteFileResponse {
            success: true,
            error: None,
        })
        .into_response(),
        Err(ManagerError::FileError(msg)) => Json(WriteFileResponse {
            success: false,
            error: Some(msg),
        })
        .into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
struct ReadFileRequest {
    path: String,
}

#[derive(Serialize)]
struct ReadFileResponse {
    success: bool,
    content: Option<String>,
    error: Option<String>,
}

async fn read_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReadFileRequest>,
) -> Response {
    match state.manager.read_file(&id, &req.path).await {
        Ok(content) => Json(ReadFileResponse {
            success: true,
            content: Some(content),
            error: None,
        })
        .into_response(),
        Err(ManagerError::FileError(msg)) => Json(ReadFileResponse {
            success: false,
            content: None,
            error: Some(msg),
        })
        .into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
struct PipInstallRequest {
    packages: Vec<String>,
}

async fn pip_install(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PipInstallRequest>,
) -> Response {
    match state.manager.pip_install(&id, &req.packages).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => map_error(e),
    }
}
