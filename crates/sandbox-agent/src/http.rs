//! Local HTTP surface served on port 2024.

use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use sandbox_core::config::DEFAULT_EXEC_TIMEOUT;
use sandbox_core::error::AgentError;

use crate::state::AgentState;
use crate::{exec, files};

pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/exec", post(exec_handler))
        .route("/exec_stream", post(exec_stream_handler))
        .route("/write_file", post(write_file_handler))
        .route("/read_file", post(read_file_handler))
        .route("/pip_install", post(pip_install_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
}

async fn health(State(state): State<AgentState>) -> Response {
    if state.is_ready() {
        Json(HealthResponse { ok: true }).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { ok: false })).into_response()
    }
}

fn resolve_workdir(state: &AgentState, workdir: Option<&str>) -> std::path::PathBuf {
    match workdir {
        Some(w) => files::resolve(state.workspace_root(), w),
        None => state.workspace_root().clone(),
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_EXEC_TIMEOUT.as_secs()
}

#[derive(Deserialize)]
struct ExecRequest {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

async fn exec_handler(State(state): State<AgentState>, Json(req): Json<ExecRequest>) -> Response {
    let workdir = resolve_workdir(&state, req.workdir.as_deref());
    match exec::run(&req.command, &workdir, Duration::from_secs(req.timeout_secs)).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
struct ExecStreamRequest {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

async fn exec_stream_handler(
    State(state): State<AgentState>,
    Json(req): Json<ExecStreamRequest>,
) -> Response {
    let workdir = resolve_workdir(&state, req.workdir.as_deref());
    match exec::run_stream(&req.command, &workdir, Duration::from_secs(req.timeout_secs)).await {
        Ok(rx) => {
            let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(|chunk| {
                let mut line = serde_json::to_string(&chunk).expect("chunk always serializes");
                line.push('\n');
                Ok::<_, std::io::Error>(Bytes::from(line))
            });
            axum::body::Body::from_stream(stream).into_response()
        }
        Err(e) => map_error(e),
    }
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

async fn write_file_handler(
    State(state): State<AgentState>,
    Json(req): Json<WriteFileRequest>,
) -> Response {
    match files::write(state.workspace_root(), &req.path, &req.content, &req.mode).await {
        Ok(()) => Json(WriteFileResponse {
            success: true,
            error: None,
        })
        .into_response(),
        Err(AgentError::FileError { reason, .. }) => Json(WriteFileResponse {
            success: false,
            error: Some(reason),
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

async fn read_file_handler(
    State(state): State<AgentState>,
    Json(req): Json<ReadFileRequest>,
) -> Response {
    match files::read(state.workspace_root(), &req.path).await {
        Ok(content) => Json(ReadFileResponse {
            success: true,
            content: Some(content),
            error: None,
        })
        .into_response(),
        Err(AgentError::FileError { reason, .. }) => Json(ReadFileResponse {
            success: false,
            content: None,
            error: Some(reason),
        })
        .into_response(),
        Err(e) => map_error(e),
    }
}

#[derive(Deserialize)]
struct PipInstallRequest {
    packages: Vec<String>,
}

async fn pip_install_handler(
    State(state): State<AgentState>,
    Json(req): Json<PipInstallRequest>,
) -> Response {
    let command = format!(
        "python3 -m pip install --no-input {}",
        req.packages
            .iter()
            .map(|p| shell_quote(p))
            .collect::<Vec<_>>()
            .join(" ")
    );
    match exec::run(&command, state.workspace_root(), DEFAULT_EXEC_TIMEOUT).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => map_error(e),
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn map_error(err: AgentError) -> Response {
    let status = match &err {
        AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AgentError::PathError(_) | AgentError::FileError { .. } => StatusCode::BAD_REQUEST,
        AgentError::ExecutionFailed(_) | AgentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let state = AgentState::new(PathBuf::from("/workspace"));
        let _app = router(state);
    }

    #[tokio::test]
    async fn health_reports_not_ok_before_mark_ready() {
        let state = AgentState::new(PathBuf::from("/workspace"));
        let response = health(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_ok_after_mark_ready() {
        let state = AgentState::new(PathBuf::from("/workspace"));
        state.mark_ready();
        let response = health(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
