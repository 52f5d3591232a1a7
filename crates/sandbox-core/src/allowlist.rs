//! Host allowlist matching and default allowlist.
//!
//! Exact, case-insensitive DNS-name matching with explicit port stripping,
//! plus SSRF hardening: raw IP literals are always rejected, and an
//! optional DNS-aware check rejects names that resolve to a private or
//! loopback address.

use std::fmt;
use std::net::IpAddr;

/// Non-routable sentinel host used to express "no network".
pub const NO_NETWORK_SENTINEL: &str = "sandbox-no-network.invalid";

/// Check if an IP address is in a private, loopback, or otherwise
/// non-routable range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // CGNAT 100.64/10
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Result of a host validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host;
    }
    match host.rfind(':') {
        Some(idx) if host[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &host[..idx],
        _ => host,
    }
}

/// A host allowlist: an ordered set of DNS host names, matched exactly and
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct HostAllowlist {
    hosts: Vec<String>,
}

impl HostAllowlist {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: hosts.into_iter().map(|h| h.to_lowercase()).collect(),
        }
    }

    pub fn empty() -> Self {
        Self { hosts: Vec::new() }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Checks `host` against the allowlist. Rejects raw IP literals
    /// unconditionally: the allowlist is domain-name-only, so an IP literal
    /// can never satisfy it, which prevents a caller from bypassing the
    /// allowlist with `https://93.184.216.34/`.
    pub fn is_allowed(&self, host: &str) -> Decision {
        let target = strip_port(host).to_lowercase();

        if target.parse::<IpAddr>().is_ok() {
            return Decision::Denied(format!(
                "raw IP address '{target}' not allowed; use domain names only"
            ));
        }

        if self.hosts.iter().any(|h| *h == target) {
            Decision::Allowed
        } else {
            Decision::Denied(format!(
                "host '{target}' not in allowlist: [{}]",
                self.hosts.join(", ")
            ))
        }
    }

    /// As [`HostAllowlist::is_allowed`], but additionally resolves the host
    /// and rejects it if it resolves to a private/loopback/link-local
    /// address — defends against DNS rebinding once the proxy has approved
    /// a name it does not itself terminate TLS for.
    pub async fn is_allowed_with_dns(&self, host: &str) -> Decision {
        let result = self.is_allowed(host);
        if !result.is_allowed() {
            return result;
        }

        let target = strip_port(host);
        match tokio::net::lookup_host(format!("{target}:443")).await {
            Ok(addrs) => {
                for addr in addrs {
                    if is_private_ip(&addr.ip()) {
                        return Decision::Denied(format!(
                            "domain '{target}' resolves to private address {}",
                            addr.ip()
                        ));
                    }
                }
                Decision::Allowed
            }
            Err(_) => Decision::Denied(format!("DNS resolution failed for '{target}'")),
        }
    }
}

impl fmt::Display for HostAllowlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.hosts.join(", "))
    }
}

/// The manager's default allowlist, used when a session is
/// created with an empty or absent `allowedHosts`.
pub fn default_allowlist() -> Vec<String> {
    vec![
        "pypi.org".to_string(),
        "files.pythonhosted.org".to_string(),
        "registry.npmjs.org".to_string(),
        "github.com".to_string(),
        "raw.githubusercontent.com".to_string(),
        "objects.githubusercontent.com".to_string(),
        "crates.io".to_string(),
        "static.crates.io".to_string(),
    ]
}

/// Extract the host (without port) from an absolute HTTP(S) URI, as the
/// proxy does when inspecting a regular (non-CONNECT) request line.
pub fn extract_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;

    let host_end = rest.find('/').unwrap_or(rest.len());
    let host_and_port = &rest[..host_end];

    let host = if let Some(bracket_idx) = host_and_port.find('[') {
        let close_bracket = host_and_port.find(']')?;
        &host_and_port[bracket_idx + 1..close_bracket]
    } else {
        strip_port(host_and_port)
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_case_insensitive() {
        let allowlist = HostAllowlist::new(vec!["Example.com".to_string()]);
        assert!(allowlist.is_allowed("example.com").is_allowed());
        assert!(allowlist.is_allowed("EXAMPLE.COM").is_allowed());
        assert!(!allowlist.is_allowed("sub.example.com").is_allowed());
    }

    #[test]
    fn port_is_stripped_before_matching() {
        let allowlist = HostAllowlist::new(vec!["example.com".to_string()]);
        assert!(allowlist.is_allowed("example.com:443").is_allowed());
    }

    #[test]
    fn empty_allowlist_denies_everything() {
        let allowlist = HostAllowlist::empty();
        assert!(!allowlist.is_allowed("example.com").is_allowed());
    }

    #[test]
    fn raw_ip_is_always_denied() {
        let allowlist = HostAllowlist::new(vec!["93.184.216.34".to_string()]);
        assert!(!allowlist.is_allowed("93.184.216.34").is_allowed());
    }

    #[test]
    fn default_allowlist_contains_expected_hosts() {
        let list = default_allowlist();
        assert!(list.contains(&"pypi.org".to_string()));
        assert!(list.contains(&"files.pythonhosted.org".to_string()));
        assert!(list.contains(&"crates.io".to_string()));
    }

    #[test]
    fn extract_host_handles_scheme_port_and_case() {
        assert_eq!(
            extract_host("https://API.example.com:8443/v1"),
            Some("api.example.com".to_string())
        );
        assert_eq!(extract_host("http://example.com"), Some("example.com".to_string()));
        assert_eq!(extract_host("not-a-url"), None);
    }
}
