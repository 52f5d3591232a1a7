//! Shared agent state: the workspace root and the readiness flag `/health`
//! reports.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone)]
pub struct AgentState {
    inner: Arc<Inner>,
}

struct Inner {
    workspace_root: PathBuf,
    ready: AtomicBool,
}

impl AgentState {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                workspace_root,
                ready: AtomicBool::new(false),
            }),
        }
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.inner.workspace_root
    }

    /// Flips `/health` to report `{ok: true}`.
    pub fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_ready_then_flips_once_marked() {
        let state = AgentState::new(PathBuf::from("/workspace"));
        assert!(!state.is_ready());
        state.mark_ready();
        assert!(state.is_ready());
    }

    #[test]
    fn clone_shares_readiness() {
        let state = AgentState::new(PathBuf::from("/workspace"));
        let clone = state.clone();
        state.mark_ready();
        assert!(clone.is_ready());
    }
}
