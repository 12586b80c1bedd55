use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use sample_api::config::SampleApiConfig;
use sample_api::{build_app, spawn_maintenance};

#[tokio::main]
async fn main() -> Result<()> {
    idemp_telemetry::install("idemp-sample-api")?;

    let config = SampleApiConfig::from_env();
    let app = build_app(&config).await?;
    spawn_maintenance(app.storage.clone(), app.maintenance_interval);

    let listener = TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "idemp-sample-api listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
