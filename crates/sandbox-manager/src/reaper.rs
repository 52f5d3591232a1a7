//! Idle reaper: periodically destroys sessions whose `last_used` timestamp
//! is older than the configured idle timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use sandbox_core::config::IDLE_REAPER_PERIOD;

use crate::manager::SandboxManager;

/// Spawns the background reaper task. Scans at most once per
/// `IDLE_REAPER_PERIOD` and destroys sessions in order of staleness; each
/// destroy goes through the same `destroy_session` path an explicit
/// caller-initiated destroy would, so it is safe against a concurrent
/// explicit destroy of the same session — the registry, not the reaper, is
/// the source of truth for "is this session still here".
pub fn spawn(manager: Arc<SandboxManager>, idle_timeout: Duration) -> tokio::task::JoinHandle<()> {
    let period = IDLE_REAPER_PERIOD.max(Duration::from_secs(1));
    let idle_timeout = chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::seconds(1800));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let now = Utc::now();
            let stale = manager.registry().stale_sessions(now, idle_timeout).await;
            for session_id in stale {
                tracing::info!(session_id = %session_id, "idle reaper destroying session");
                manager.destroy_session(session_id.as_str()).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeRuntime;
    use sandbox_core::config::ManagerConfig;
    use sandbox_core::session::{SessionId, SessionRecord};
    use std::path::PathBuf;

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            grpc_port: 0,
            sandbox_image: "test:latest".to_string(),
            sandbox_runtime: "runc".to_string(),
            storage_path: None,
            session_timeout: Duration::from_secs(1800),
            proxy_host: None,
            proxy_port: 15004,
            signing_key: Some(b"test-secret".to_vec()),
        }
    }

    #[tokio::test]
    async fn reaper_destroys_only_stale_sessions() {
        let manager = Arc::new(SandboxManager::new(test_config(), Arc::new(FakeRuntime::new())));
        let now = Utc::now();

        manager
            .registry()
            .insert(SessionRecord {
                session_id: SessionId("fresh".to_string()),
                tenant_id: None,
                container_id: "c-fresh".to_string(),
                agent_addr: "127.0.0.1:2024".parse().unwrap(),
                allowed_hosts: vec![],
                workspace_path: PathBuf::from("/workspace"),
                created_at: now,
                last_used: now,
                terminal: false,
            })
            .await;

        manager
            .registry()
            .insert(SessionRecord {
                session_id: SessionId("stale".to_string()),
                tenant_id: None,
                container_id: "c-stale".to_string(),
                agent_addr: "127.0.0.1:2024".parse().unwrap(),
                allowed_hosts: vec![],
                workspace_path: PathBuf::from("/workspace"),
                created_at: now,
                last_used: now - chrono::Duration::seconds(7200),
                terminal: false,
            })
            .await;

        let stale_ids = manager
            .registry()
            .stale_sessions(now, chrono::Duration::seconds(1800))
            .await;
        assert_eq!(stale_ids, vec![SessionId("stale".to_string())]);

        for id in stale_ids {
            manager.destroy_session(id.as_str()).await;
        }

        let remaining = manager.list_sessions().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, SessionId("fresh".to_string()));
    }
}
