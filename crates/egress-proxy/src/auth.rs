//! `Proxy-Authorization` bearer token extraction and verification.

use chrono::Utc;
use hyper::HeaderMap;
use hyper::header::PROXY_AUTHORIZATION;

use sandbox_core::error::{ProxyError, ProxyResult, TokenError};
use sandbox_core::token::{Claims, TokenService};

const BEARER_PREFIX: &str = "Bearer ";

/// Extracts the bearer token from `Proxy-Authorization`, verifies its
/// signature and expiry, and checks `host` against its allowlist. This is
/// the single gate every proxied request passes through:
/// on any failure here, no upstream connection or DNS lookup happens.
pub fn authorize(tokens: &TokenService, headers: &HeaderMap, host: &str) -> ProxyResult<Claims> {
    let token = extract_bearer(headers).ok_or(ProxyError::TokenInvalid(TokenError::Malformed))?;
    tokens
        .verify_for_host(token, host, Utc::now())
        .map_err(ProxyError::TokenInvalid)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(PROXY_AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix(BEARER_PREFIX)
}
