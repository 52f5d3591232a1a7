//! `egress-proxyd`: the forward egress proxy binary.

use sandbox_core::config::ProxyConfig;
use sandbox_core::token::TokenService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ProxyConfig::from_env();
    let tokens = match config.signing_key {
        Some(key) => TokenService::new(key),
        None => {
            tracing::warn!(
                "no SIGNING_KEY configured; generating a random one, which will not verify \
                 tokens issued by a sandbox-manager running in another process"
            );
            TokenService::generate()
        }
    };

    tracing::info!(port = config.listen_port, "starting egress proxy");

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    egress_proxy::server::serve(addr, tokens).await?;

    Ok(())
}
