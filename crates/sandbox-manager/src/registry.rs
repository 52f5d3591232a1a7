//! The session registry: the manager's only significant shared mutable
//! state.
//!
//! A single mutex guards the map for every mutation and every snapshot
//! read. Callers must never hold the lock across an I/O call to a
//! container runtime or an agent — take the lock, copy what's needed,
//! release it, then do I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use sandbox_core::session::{SessionId, SessionInfo, SessionRecord};

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<SessionId, SessionRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly-live session. Returns `false` (and does not
    /// overwrite) if the id is already present — session ids are unique
    /// across the live registry.
    pub async fn insert(&self, record: SessionRecord) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.contains_key(&record.session_id) {
            return false;
        }
        guard.insert(record.session_id.clone(), record);
        true
    }

    /// Remove a session, returning its record if one was present.
    pub async fn remove(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.inner.lock().await.remove(session_id)
    }

    /// Snapshot-clone a single record.
    pub async fn get(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.inner.lock().await.get(session_id).cloned()
    }

    /// Snapshot of every live session, projected to the public descriptor.
    pub async fn list(&self) -> Vec<SessionInfo> {
        self.inner
            .lock()
            .await
            .values()
            .map(SessionRecord::to_info)
            .collect()
    }

    /// Advance `last_used` for a session after a successful call. Returns
    /// `false` if the session is no longer in the registry (it may have
    /// been destroyed concurrently).
    pub async fn touch(&self, session_id: &SessionId, now: DateTime<Utc>) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.get_mut(session_id) {
            Some(record) => {
                record.touch(now);
                true
            }
            None => false,
        }
    }

    /// Session ids whose `last_used` is older than `idle_timeout` as of
    /// `now`, ordered from most to least stale.
    pub async fn stale_sessions(
        &self,
        now: DateTime<Utc>,
        idle_timeout: chrono::Duration,
    ) -> Vec<SessionId> {
        let guard = self.inner.lock().await;
        let mut stale: Vec<(SessionId, DateTime<Utc>)> = guard
            .values()
            .filter(|r| r.is_idle(now, idle_timeout))
            .map(|r| (r.session_id.clone(), r.last_used))
            .collect();
        stale.sort_by_key(|(_, last_used)| *last_used);
        stale.into_iter().map(|(id, _)| id).collect()
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.inner.lock().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::path::PathBuf;

    fn record(id: &str, last_used: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            session_id: SessionId(id.to_string()),
            tenant_id: None,
            container_id: format!("container-{id}"),
            agent_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2024),
            allowed_hosts: vec!["example.com".to_string()],
            workspace_path: PathBuf::from("/workspace"),
            created_at: last_used,
            last_used,
            terminal: false,
        }
    }

    #[tokio::test]
    async fn insert_then_list_then_remove() {
        let registry = SessionRegistry::new();
        let now = Utc::now();
        assert!(registry.insert(record("a", now)).await);

        let sessions = registry.list().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, SessionId("a".to_string()));

        let removed = registry.remove(&SessionId("a".to_string())).await;
        assert!(removed.is_some());
        assert_eq!(registry.list().await.len(), 0);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_id() {
        let registry = SessionRegistry::new();
        let now = Utc::now();
        assert!(registry.insert(record("a", now)).await);
        assert!(!registry.insert(record("a", now)).await);
    }

    #[tokio::test]
    async fn remove_on_unknown_id_returns_none() {
        let registry = SessionRegistry::new();
        assert!(registry.remove(&SessionId("missing".to_string())).await.is_none());
    }

    #[tokio::test]
    async fn touch_refreshes_last_used_and_fails_after_removal() {
        let registry = SessionRegistry::new();
        let t0 = Utc::now();
        registry.insert(record("a", t0)).await;

        let t1 = t0 + chrono::Duration::seconds(10);
        assert!(registry.touch(&SessionId("a".to_string()), t1).await);
        assert_eq!(registry.get(&SessionId("a".to_string())).await.unwrap().last_used, t1);

        registry.remove(&SessionId("a".to_string())).await;
        assert!(!registry.touch(&SessionId("a".to_string()), t1).await);
    }

    #[tokio::test]
    async fn stale_sessions_orders_by_staleness() {
        let registry = SessionRegistry::new();
        let now = Utc::now();
        registry.insert(record("fresh", now)).await;
        registry
            .insert(record("stale", now - chrono::Duration::seconds(3600)))
            .await;
        registry
            .insert(record("stalest", now - chrono::Duration::seconds(7200)))
            .await;

        let stale = registry.stale_sessions(now, chrono::Duration::seconds(1800)).await;
        assert_eq!(
            stale,
            vec![SessionId("stalest".to_string()), SessionId("stale".to_string())]
        );
    }
}
