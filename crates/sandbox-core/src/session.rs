//! Session data model.
//!
//! A [`SessionRecord`] is the registry's internal value type: everything the
//! manager needs to dispatch calls to a live sandbox. [`SessionInfo`] is the
//! subset projected back to callers (the "session descriptor" in spec terms).

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session identifier, caller-supplied or generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque tenant identifier; tenants own a persistent workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Registry value type: a live session's full internal state.
///
/// Invariant: `last_used` is never older than the most recent successful
/// API call targeting this session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub tenant_id: Option<TenantId>,
    pub container_id: String,
    pub agent_addr: SocketAddr,
    pub allowed_hosts: Vec<String>,
    pub workspace_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub terminal: bool,
}

impl SessionRecord {
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used = now;
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        now - self.last_used > idle_timeout
    }

    pub fn to_info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            container_id: self.container_id.clone(),
            allowed_hosts: self.allowed_hosts.clone(),
            workspace_path: self.workspace_path.clone(),
        }
    }
}

/// The wire-facing session descriptor returned by `createSession` /
/// `listSessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub container_id: String,
    pub allowed_hosts: Vec<String>,
    pub workspace_path: PathBuf,
}

/// Result of a (possibly streamed) exec call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// A single chunk of a streaming exec response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum ExecChunk {
    Stdout { data: String },
    Stderr { data: String },
    Exit { exit_code: i32 },
}

/// Sentinel exit code used when the agent connection drops before the
/// terminal exit chunk arrives.
pub const EXIT_CODE_INTERRUPTED: i32 = -1;
