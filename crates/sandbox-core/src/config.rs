//! Environment-variable configuration shared across binaries.

use std::time::Duration;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the `sandbox-manager` binary.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub grpc_port: u16,
    pub sandbox_image: String,
    pub sandbox_runtime: String,
    pub storage_path: Option<String>,
    pub session_timeout: Duration,
    pub proxy_host: Option<String>,
    pub proxy_port: u16,
    pub signing_key: Option<Vec<u8>>,
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        Self {
            grpc_port: env_parsed("GRPC_PORT", 50051),
            sandbox_image: env_or("SANDBOX_IMAGE", "sandbox-exec/default:latest"),
            sandbox_runtime: env_or("SANDBOX_RUNTIME", "runsc"),
            storage_path: std::env::var("STORAGE_PATH").ok(),
            session_timeout: Duration::from_secs(env_parsed("SESSION_TIMEOUT", 1800)),
            proxy_host: std::env::var("PROXY_HOST").ok(),
            proxy_port: env_parsed("PROXY_PORT", 15004),
            signing_key: std::env::var("SIGNING_KEY").ok().map(|s| s.into_bytes()),
        }
    }

    /// Whether tenant workspace persistence is enabled.
    pub fn persistence_enabled(&self) -> bool {
        self.storage_path.is_some()
    }

    /// Whether sandboxes should be configured to egress through the proxy.
    pub fn proxy_enabled(&self) -> bool {
        self.proxy_host.is_some()
    }
}

/// Configuration for the `egress-proxy` binary.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_port: u16,
    pub signing_key: Option<Vec<u8>>,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self {
            listen_port: env_parsed("PROXY_PORT", 15004),
            signing_key: std::env::var("SIGNING_KEY").ok().map(|s| s.into_bytes()),
        }
    }
}

/// Fixed port the in-sandbox agent listens on.
pub const AGENT_PORT: u16 = 2024;

/// Sandbox startup deadline.
pub const SANDBOX_STARTUP_DEADLINE: Duration = Duration::from_secs(30);

/// Default exec timeout when the caller does not supply one.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum idle-reaper scan period.
pub const IDLE_REAPER_PERIOD: Duration = Duration::from_secs(30);

/// Grace window between SIGTERM and SIGKILL escalation.
pub const KILL_GRACE_WINDOW: Duration = Duration::from_secs(2);

/// Small slack added to session TTL to compute token expiry.
pub const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Backoff before the manager's single retry of a failed agent call.
pub const AGENT_RETRY_BACKOFF: Duration = Duration::from_millis(150);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_config_defaults_without_env() {
        // SAFETY: test runs in isolation; no other test mutates these vars.
        for var in [
            "GRPC_PORT",
            "SANDBOX_IMAGE",
            "SANDBOX_RUNTIME",
            "STORAGE_PATH",
            "SESSION_TIMEOUT",
            "PROXY_HOST",
            "PROXY_PORT",
            "SIGNING_KEY",
        ] {
            unsafe { std::env::remove_var(var) };
        }

        let config = ManagerConfig::from_env();
        assert_eq!(config.grpc_port, 50051);
        assert_eq!(config.proxy_port, 15004);
        assert_eq!(config.session_timeout, Duration::from_secs(1800));
        assert!(!config.persistence_enabled());
        assert!(!config.proxy_enabled());
    }
}
