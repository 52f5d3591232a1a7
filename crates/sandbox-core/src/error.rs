//! Error types shared by the manager, the in-sandbox agent, and the proxy.

/// Errors raised while issuing or verifying session tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("host '{0}' is not in the token's allowlist")]
    HostNotAllowed(String),
}

/// Errors raised by the sandbox manager (session lifecycle, dispatch).
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("sandbox did not become ready in time: {reason}")]
    SandboxStartup { reason: String },

    #[error("agent unreachable for session '{session_id}': {reason}")]
    AgentUnreachable { session_id: String, reason: String },

    #[error("execution timed out after {0:?}")]
    ExecTimeout(std::time::Duration),

    #[error("file operation failed: {0}")]
    FileError(String),

    #[error("session allowlist does not permit package installation: {0}")]
    AllowlistViolation(String),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the in-sandbox execution agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("path error: {0}")]
    PathError(String),

    #[error("file error: {path}: {reason}")]
    FileError { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the egress proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("token invalid: {0}")]
    TokenInvalid(#[from] TokenError),

    #[error("host '{0}' not allowed")]
    AllowlistViolation(String),

    #[error("upstream connection failed: {0}")]
    UpstreamError(String),
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;
pub type AgentResult<T> = std::result::Result<T, AgentError>;
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;
pub type TokenResult<T> = std::result::Result<T, TokenError>;
