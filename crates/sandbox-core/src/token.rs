//! Session token issuance and verification.
//!
//! Tokens bind a session id to its host allowlist so the egress proxy can
//! authorize outbound traffic without consulting the manager's registry.
//! They are signed HMAC-SHA256 bearer credentials, not a general JWT: the
//! claim set is fixed (`sub`, `hosts`, `iat`, `exp`) and the encoding is a
//! compact `base64(json).base64(signature)` pair, matching the crypto stack
//! the rest of this system already carries (`hmac`, `sha2`, `base64`,
//! `subtle` for constant-time comparison).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{TokenError, TokenResult};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Session id this token is bound to.
    pub sub: String,
    /// Host allowlist granted to the session.
    pub hosts: Vec<String>,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Issues and verifies session tokens using a process-wide shared secret.
///
/// If no signing key is configured, a random one is generated on startup,
/// which means tokens it issues cannot be verified by a proxy running in a
/// different process unless that secret is shared explicitly via
/// `SIGNING_KEY`.
#[derive(Clone)]
pub struct TokenService {
    key: Vec<u8>,
}

impl TokenService {
    /// Construct a token service from an explicit secret.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Construct a token service with a freshly generated random secret.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Issue a token for `session_id` with the given allowlist, expiring
    /// `ttl` seconds from `now`.
    pub fn issue(
        &self,
        session_id: &str,
        hosts: &[String],
        now: chrono::DateTime<chrono::Utc>,
        ttl: chrono::Duration,
    ) -> String {
        let claims = Claims {
            sub: session_id.to_string(),
            hosts: hosts.to_vec(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &Claims) -> String {
        let payload = serde_json::to_vec(claims).expect("claims always serialize");
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
        let sig = self.sign(payload_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(sig);
        format!("{payload_b64}.{sig_b64}")
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Verify a token's signature and expiry, returning its claims.
    ///
    /// Does not check the allowlist — callers combine this with
    /// [`Claims::allows`] once they know the target host.
    pub fn verify(&self, token: &str, now: chrono::DateTime<chrono::Utc>) -> TokenResult<Claims> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;

        let expected_sig = self.sign(payload_b64.as_bytes());
        let given_sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;

        let matches: bool = expected_sig.ct_eq(&given_sig).into();
        if !matches {
            return Err(TokenError::BadSignature);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if now.timestamp() > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Verify a token and additionally require that `host` is in its
    /// allowlist. This is the check the egress proxy performs on every
    /// request.
    pub fn verify_for_host(
        &self,
        token: &str,
        host: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> TokenResult<Claims> {
        let claims = self.verify(token, now)?;
        if claims.allows(host) {
            Ok(claims)
        } else {
            Err(TokenError::HostNotAllowed(host.to_string()))
        }
    }
}

impl Claims {
    /// Exact DNS-name match, case-insensitive, ignoring an explicit port on
    /// either side.
    pub fn allows(&self, host: &str) -> bool {
        let target = strip_port(host).to_lowercase();
        self.hosts
            .iter()
            .any(|h| strip_port(h).to_lowercase() == target)
    }
}

fn strip_port(host: &str) -> &str {
    // Don't strip a "port" off an IPv6 literal's bracketed portion.
    if host.starts_with('[') {
        return host;
    }
    match host.rfind(':') {
        Some(idx) if host[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &host[..idx],
        _ => host,
    }
}
