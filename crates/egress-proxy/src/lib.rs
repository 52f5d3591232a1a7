//! `egress-proxy`: the forward HTTP/HTTPS proxy sandboxes egress through,
//! enforcing each session's host allowlist at the edge.

pub mod auth;
pub mod server;
