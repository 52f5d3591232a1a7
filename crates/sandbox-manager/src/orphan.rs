//! Orphan recovery: on startup, reconcile running sandboxes labeled with
//! this manager's marker against the (empty, since there is no registry
//! durability) in-memory registry, and destroy anything the registry
//! doesn't know about.
//!
//! Since the registry never survives a manager restart, every labeled
//! container found at startup is, by definition, an orphan: there is no
//! persisted registry entry for it to match against.

use std::sync::Arc;

use crate::container::ContainerRuntime;

/// Destroys every container carrying this manager's marker label. Returns
/// the number of containers destroyed.
pub async fn reconcile(runtime: &Arc<dyn ContainerRuntime>) -> usize {
    let labeled = match runtime.list_labeled().await {
        Ok(handles) => handles,
        Err(e) => {
            tracing::warn!(error = %e, "orphan recovery: failed to list labeled containers");
            return 0;
        }
    };

    let mut destroyed = 0;
    for handle in labeled {
        tracing::info!(container_id = %handle.container_id, "destroying orphaned sandbox");
        if runtime.stop(&handle.container_id).await.is_ok() {
            destroyed += 1;
        }
    }
    destroyed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeRuntime;
    use crate::container::ContainerSpec;
    use std::collections::HashMap;

    #[tokio::test]
    async fn reconcile_destroys_every_labeled_container() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime::new());
        runtime
            .start(ContainerSpec {
                name: "orphan-1".to_string(),
                image: "img".to_string(),
                runtime: "runc".to_string(),
                memory_bytes: 1,
                nano_cpus: 1_000_000_000,
                workspace_host_path: "/tmp/a".into(),
                outputs_host_path: "/tmp/a-out".into(),
                env: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(runtime.list_labeled().await.unwrap().len(), 1);
        let destroyed = reconcile(&runtime).await;
        assert_eq!(destroyed, 1);
        assert_eq!(runtime.list_labeled().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn reconcile_on_empty_runtime_is_noop() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime::new());
        assert_eq!(reconcile(&runtime).await, 0);
    }
}
