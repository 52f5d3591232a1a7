//! `sandbox-agentd`: PID-1 entry point inside each sandbox.

use std::net::SocketAddr;
use std::path::PathBuf;

use sandbox_agent::{AgentState, http};
use sandbox_core::config::AGENT_PORT;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let workspace_root = std::env::var("SANDBOX_WORKSPACE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/workspace"));
    std::fs::create_dir_all(&workspace_root)?;

    let state = AgentState::new(workspace_root);
    state.mark_ready();

    let addr = SocketAddr::from(([0, 0, 0, 0], AGENT_PORT));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "in-sandbox agent listening");

    axum::serve(listener, http::router(state)).await?;

    Ok(())
}
