//! Forwards exec/file calls from the manager to a session's in-sandbox
//! agent over local HTTP.

use std::time::Duration;

use sandbox_core::config::AGENT_RETRY_BACKOFF;
use sandbox_core::error::{ManagerError, ManagerResult};
use sandbox_core::session::{ExecChunk, ExecResult, SessionRecord};

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn base_url(record: &SessionRecord) -> String {
        format!("http://{}", record.agent_addr)
    }

    /// POSTs `body` as JSON to `url`, retrying once after a short backoff
    /// if the first attempt fails to reach the agent at all. This is the
    /// "retry once with short backoff, then surface `AgentUnreachable`"
    /// behavior the error taxonomy documents for a mid-session agent that
    /// has gone briefly unreachable (a restart, a slow accept queue).
    async fn post_json_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> reqwest::Result<reqwest::Response> {
        match self.http.post(url).json(body).send().await {
            Ok(resp) => Ok(resp),
            Err(_first_err) => {
                tokio::time::sleep(AGENT_RETRY_BACKOFF).await;
                self.http.post(url).json(body).send().await
            }
        }
    }

    /// Polls `/health` until it reports ready or `deadline` elapses.
    pub async fn wait_healthy(&self, record: &SessionRecord, deadline: Duration) -> bool {
        let url = format!("{}/health", Self::base_url(record));
        let start = tokio::time::Instant::now();
        loop {
            if let Ok(resp) = self.http.get(&url).send().await {
                if resp.status().is_success() {
                    return true;
                }
            }
            if start.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// `exec`: forwards with a wall-clock deadline slightly larger than the
    /// in-sandbox timeout, so the agent can report its own timeout cleanly.
    pub async fn exec(
        &self,
        record: &SessionRecord,
        command: &str,
        timeout: Duration,
        workdir: Option<&str>,
    ) -> ManagerResult<ExecResult> {
        let url = format!("{}/exec", Self::base_url(record));
        let body = serde_json::json!({
            "command": command,
            "timeout_secs": timeout.as_secs(),
            "workdir": workdir,
        });

        let outer_deadline = timeout + Duration::from_secs(5);
        let send = self.post_json_with_retry(&url, &body);

        let resp = tokio::time::timeout(outer_deadline, send)
            .await
            .map_err(|_| ManagerError::AgentUnreachable {
                session_id: record.session_id.to_string(),
                reason: "exec call exceeded manager-side deadline".to_string(),
            })?
            .map_err(|e| ManagerError::AgentUnreachable {
                session_id: record.session_id.to_string(),
                reason: e.to_string(),
            })?;

        resp.json::<ExecResult>()
            .await
            .map_err(|e| ManagerError::AgentUnreachable {
                session_id: record.session_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// `execStream`: opens a chunked connection to the agent and yields
    /// parsed chunks, one JSON object per line, terminated by an `Exit`
    /// chunk. If the agent connection drops before a
    /// terminal chunk arrives, a synthetic `Exit` chunk carrying the
    /// interrupted-execution sentinel is emitted so the bridge's
    /// "exit chunk is always last" contract holds regardless.
    pub async fn exec_stream(
        &self,
        record: &SessionRecord,
        command: &str,
        workdir: Option<&str>,
    ) -> ManagerResult<tokio_stream::wrappers::ReceiverStream<ExecChunk>> {
        use futures::StreamExt;

        let url = format!("{}/exec_stream", Self::base_url(record));
        let body = serde_json::json!({ "command": command, "workdir": workdir });

        let resp = self
            .post_json_with_retry(&url, &body)
            .await
            .map_err(|e| ManagerError::AgentUnreachable {
                session_id: record.session_id.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = tokio::sync::mpsc::channel::<ExecChunk>(64);

        tokio::spawn(async move {
            let mut byte_stream = Box::pin(resp.bytes_stream());
            let mut buf = String::new();
            let mut saw_exit = false;

            while let Some(chunk) = byte_stream.next().await {
                let Ok(bytes) = chunk else { break };
                buf.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].to_string();
                    buf.drain(..=pos);
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Ok(parsed) = serde_json::from_str::<ExecChunk>(&line) {
                        let is_exit = matches!(parsed, ExecChunk::Exit { .. });
                        if tx.send(parsed).await.is_err() {
                            return;
                        }
                        if is_exit {
                            saw_exit = true;
                        }
                    }
                }
            }

            if !saw_exit {
                let _ = tx
                    .send(ExecChunk::Exit {
                        exit_code: sandbox_core::session::EXIT_CODE_INTERRUPTED,
                    })
                    .await;
            }
        });

        Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
    }

    pub async fn write_file(
        &self,
        record: &SessionRecord,
        path: &str,
        content: &str,
        mode: &str,
    ) -> ManagerResult<()> {
        let url = format!("{}/write_file", Self::base_url(record));
        let body = serde_json::json!({ "path": path, "content": content, "mode": mode });

        let resp = self
            .post_json_with_retry(&url, &body)
            .await
            .map_err(|e| ManagerError::AgentUnreachable {
                session_id: record.session_id.to_string(),
                reason: e.to_string(),
            })?;

        let parsed: serde_json::Value =
            resp.json()
                .await
                .map_err(|e| ManagerError::AgentUnreachable {
                    session_id: record.session_id.to_string(),
                    reason: e.to_string(),
                })?;

        if parsed["success"].as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(ManagerError::FileError(
                parsed["error"]
                    .as_str()
                    .unwrap_or("unknown file error")
                    .to_string(),
            ))
        }
    }

    pub async fn read_file(&self, record: &SessionRecord, path: &str) -> ManagerResult<String> {
        let url = format!("{}/read_file", Self::base_url(record));
        let body = serde_json::json!({ "path": path });

        let resp = self
            .post_json_with_retry(&url, &body)
            .await
            .map_err(|e| ManagerError::AgentUnreachable {
                session_id: record.session_id.to_string(),
                reason: e.to_string(),
            })?;

        let parsed: serde_json::Value =
            resp.json()
                .await
                .map_err(|e| ManagerError::AgentUnreachable {
                    session_id: record.session_id.to_string(),
                    reason: e.to_string(),
                })?;

        if parsed["success"].as_bool().unwrap_or(false) {
            Ok(parsed["content"].as_str().unwrap_or("").to_string())
        } else {
            Err(ManagerError::FileError(
                parsed["error"]
                    .as_str()
                    .unwrap_or("unknown file error")
                    .to_string(),
            ))
        }
    }
}
