//! Shared types for the sandboxed remote execution system.
//!
//! This crate holds everything the manager, the in-sandbox agent, and the
//! egress proxy all need to agree on: the session data model, the signed
//! session token format, host allowlist matching, and environment-variable
//! configuration. It has no network or process-execution code of its own —
//! those live in the binary crates that depend on it.

pub mod allowlist;
pub mod config;
pub mod error;
pub mod session;
pub mod token;

pub use allowlist::{Decision, HostAllowlist, default_allowlist};
pub use error::{AgentError, ManagerError, ProxyError, TokenError};
pub use session::{ExecChunk, ExecResult, SessionId, SessionInfo, SessionRecord, TenantId};
pub use token::{Claims, TokenService};
