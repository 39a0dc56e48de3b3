use std::sync::Arc;

use anyhow::Context;

use kiln_api::app::{build_app, services::build_services};
use kiln_api::middleware::AccessState;
use kiln_infra::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    kiln_observability::init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let access = AccessState::from_config(&config);
    if !access.policy.is_enforced() {
        tracing::warn!("KILN_ALLOWED_ACCOUNTS not set; access control disabled");
    }

    let services = Arc::new(build_services(&config).await.context("failed to open job store")?);
    let app = build_app(services, access);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
