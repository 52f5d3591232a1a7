//! `sandboxd`: the Sandbox Manager binary.

use std::sync::Arc;

use sandbox_core::config::ManagerConfig;
use sandbox_manager::{BollardRuntime, SandboxManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ManagerConfig::from_env();
    tracing::info!(
        image = %config.sandbox_image,
        runtime = %config.sandbox_runtime,
        persistence = config.persistence_enabled(),
        proxy = config.proxy_enabled(),
        "starting sandbox manager"
    );

    let runtime = BollardRuntime::connect()?;
    if !runtime.ping().await {
        anyhow::bail!("container runtime is not reachable; is the daemon running?");
    }
    let runtime: Arc<dyn sandbox_manager::ContainerRuntime> = Arc::new(runtime);

    let destroyed = sandbox_manager::orphan::reconcile(&runtime).await;
    if destroyed > 0 {
        tracing::info!(count = destroyed, "reclaimed orphaned sandboxes on startup");
    }

    let idle_timeout = config.session_timeout;
    let manager = Arc::new(SandboxManager::new(config.clone(), runtime));
    let _reaper = sandbox_manager::reaper::spawn(manager.clone(), idle_timeout);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
    sandbox_manager::http::serve(addr, manager.clone(), shutdown_signal()).await?;

    let sessions = manager.list_sessions().await;
    if !sessions.is_empty() {
        tracing::info!(count = sessions.len(), "tearing down live sessions on shutdown");
        for session in sessions {
            manager.destroy_session(session.session_id.as_str()).await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
