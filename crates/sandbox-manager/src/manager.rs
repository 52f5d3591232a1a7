//! `SandboxManager`: session lifecycle orchestration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use sandbox_core::allowlist::{self, NO_NETWORK_SENTINEL};
use sandbox_core::config::{
    AGENT_PORT, DEFAULT_EXEC_TIMEOUT, ManagerConfig, SANDBOX_STARTUP_DEADLINE,
    TOKEN_EXPIRY_SLACK,
};
use sandbox_core::error::{ManagerError, ManagerResult};
use sandbox_core::session::{ExecChunk, ExecResult, SessionId, SessionInfo, SessionRecord, TenantId};
use sandbox_core::token::TokenService;

use crate::container::{ContainerRuntime, ContainerSpec};
use crate::dispatch::AgentClient;
use crate::registry::SessionRegistry;

/// Packages required for `pipInstall` to be permitted.
const PIP_REQUIRED_HOSTS: [&str; 2] = ["pypi.org", "files.pythonhosted.org"];

pub struct SandboxManager {
    config: ManagerConfig,
    registry: SessionRegistry,
    runtime: Arc<dyn ContainerRuntime>,
    agent: AgentClient,
    tokens: TokenService,
}

impl SandboxManager {
    pub fn new(config: ManagerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let tokens = match &config.signing_key {
            Some(key) => TokenService::new(key.clone()),
            None => {
                tracing::warn!(
                    "SIGNING_KEY not set; generating a random session-token secret. \
                     The egress proxy must run in this same process group or share \
                     this secret explicitly to verify tokens this manager issues."
                );
                TokenService::generate()
            }
        };

        Self {
            config,
            registry: SessionRegistry::new(),
            runtime,
            agent: AgentClient::new(),
            tokens,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn tenant_workspace_path(&self, tenant_id: Option<&TenantId>) -> PathBuf {
        match (&self.config.storage_path, tenant_id) {
            (Some(root), Some(tenant)) => Path::new(root).join(tenant.as_str()),
            _ => std::env::temp_dir().join(format!("sandbox-ephemeral-{}", uuid::Uuid::new_v4())),
        }
    }

    /// `createSession(sessionId?, tenantId?, allowedHosts?) -> SessionInfo`.
    pub async fn create_session(
        &self,
        session_id: Option<String>,
        tenant_id: Option<String>,
        allowed_hosts: Option<Vec<String>>,
    ) -> ManagerResult<SessionInfo> {
        let session_id = session_id
            .map(SessionId::from)
            .unwrap_or_else(SessionId::generate);
        let tenant_id = tenant_id.map(TenantId::from);

        // Empty/absent allowlist both mean "use the default" — the wire
        // format cannot distinguish them, and this is intentional.
        let hosts = match allowed_hosts {
            Some(hosts) if !hosts.is_empty() => hosts,
            _ => allowlist::default_allowlist(),
        };

        let now = Utc::now();
        let workspace_path = self.tenant_workspace_path(tenant_id.as_ref());
        std::fs::create_dir_all(&workspace_path)?;
        let outputs_path = workspace_path.join(".outputs");
        std::fs::create_dir_all(&outputs_path)?;

        let mut env = HashMap::new();
        let ttl = chrono::Duration::from_std(self.config.session_timeout)
            .unwrap_or(chrono::Duration::seconds(1800))
            + chrono::Duration::from_std(TOKEN_EXPIRY_SLACK).unwrap();
        let token = self.tokens.issue(session_id.as_str(), &hosts, now, ttl);
        env.insert("SANDBOX_SESSION_TOKEN".to_string(), token);

        if self.config.proxy_enabled() {
            let proxy_host = self.config.proxy_host.clone().unwrap();
            let proxy_url = format!("http://{proxy_host}:{}", self.config.proxy_port);
            env.insert("HTTP_PROXY".to_string(), proxy_url.clone());
            env.insert("HTTPS_PROXY".to_string(), proxy_url);
        }

        let spec = ContainerSpec {
            name: format!("sandbox-{session_id}"),
            image: self.config.sandbox_image.clone(),
            runtime: self.config.sandbox_runtime.clone(),
            memory_bytes: 4 * 1024 * 1024 * 1024, // 4 GiB
            nano_cpus: 4_000_000_000,
            workspace_host_path: workspace_path.clone(),
            outputs_host_path: outputs_path,
            env,
        };

        let handle = self
            .runtime
            .start(spec)
            .await
            .map_err(|e| ManagerError::SandboxStartup {
                reason: e.to_string(),
            })?;

        let record = SessionRecord {
            session_id: session_id.clone(),
            tenant_id,
            container_id: handle.container_id.clone(),
            agent_addr: handle.agent_addr,
            allowed_hosts: hosts,
            workspace_path,
            created_at: now,
            last_used: now,
            terminal: false,
        };

        let healthy = self
            .agent
            .wait_healthy(&record, SANDBOX_STARTUP_DEADLINE)
            .await;
        if !healthy {
            let _ = self.runtime.stop(&handle.container_id).await;
            return Err(ManagerError::SandboxStartup {
                reason: "agent did not become ready before the startup deadline".to_string(),
            });
        }

        let info = record.to_info();
        self.registry.insert(record).await;
        Ok(info)
    }

    /// `destroySession(sessionId) -> bool`. Idempotent.
    pub async fn destroy_session(&self, session_id: &str) -> bool {
        let session_id = SessionId(session_id.to_string());
        match self.registry.remove(&session_id).await {
            Some(record) => {
                let _ = self.runtime.stop(&record.container_id).await;
                true
            }
            None => false,
        }
    }

    /// `listSessions() -> [SessionInfo]`.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.registry.list().await
    }

    async fn require_record(&self, session_id: &str) -> ManagerResult<SessionRecord> {
        self.registry
            .get(&SessionId(session_id.to_string()))
            .await
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()))
    }

    /// `exec(sessionId, command, timeout, workdir) -> ExecResult`.
    pub async fn exec(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
        workdir: Option<&str>,
    ) -> ManagerResult<ExecResult> {
        let record = self.require_record(session_id).await?;
        let timeout = timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT);

        let result = self.agent.exec(&record, command, timeout, workdir).await?;
        self.registry
            .touch(&record.session_id, Utc::now())
            .await;
        Ok(result)
    }

    /// `execStream(sessionId, command, workdir) -> stream of Chunk`.
    pub async fn exec_stream(
        &self,
        session_id: &str,
        command: &str,
        workdir: Option<&str>,
    ) -> ManagerResult<tokio_stream::wrappers::ReceiverStream<ExecChunk>> {
        let record = self.require_record(session_id).await?;
        let stream = self.agent.exec_stream(&record, command, workdir).await?;
        self.registry.touch(&record.session_id, Utc::now()).await;
        Ok(stream)
    }

    pub async fn write_file(
        &self,
        session_id: &str,
        path: &str,
        content: &str,
        mode: &str,
    ) -> ManagerResult<()> {
        let record = self.require_record(session_id).await?;
        self.agent.write_file(&record, path, content, mode).await?;
        self.registry.touch(&record.session_id, Utc::now()).await;
        Ok(())
    }

    pub async fn read_file(&self, session_id: &str, path: &str) -> ManagerResult<String> {
        let record = self.require_record(session_id).await?;
        let content = self.agent.read_file(&record, path).await?;
        self.registry.touch(&record.session_id, Utc::now()).await;
        Ok(content)
    }

    /// `pipInstall(sessionId, packages) -> ExecResult`. Sugar over `exec`,
    /// rejected synchronously if the allowlist doesn't cover both PyPI
    /// hosts.
    pub async fn pip_install(
        &self,
        session_id: &str,
        packages: &[String],
    ) -> ManagerResult<ExecResult> {
        let record = self.require_record(session_id).await?;

        let missing: Vec<&str> = PIP_REQUIRED_HOSTS
            .iter()
            .filter(|host| !record.allowed_hosts.iter().any(|h| h == *host))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ManagerError::AllowlistViolation(format!(
                "pip install requires {:?} in the session allowlist, missing {:?}",
                PIP_REQUIRED_HOSTS, missing
            )));
        }

        let command = format!(
            "python3 -m pip install --no-input {}",
            packages
                .iter()
                .map(|p| shell_quote(p))
                .collect::<Vec<_>>()
                .join(" ")
        );

        self.exec(session_id, &command, None, None).await
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn agent_port(&self) -> u16 {
        AGENT_PORT
    }

    pub fn no_network_sentinel(&self) -> &'static str {
        NO_NETWORK_SENTINEL
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
