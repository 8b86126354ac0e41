use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use herdwatch::api;
use herdwatch::logging::init_logging;
use herdwatch::{load_config, DetectionService};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cfg = load_config()?;
    let addr = format!("{}:{}", cfg.api.host, cfg.api.port);

    let service = Arc::new(DetectionService::new(cfg));
    if let Err(e) = service.start() {
        // The API still serves status and (empty) history in this state.
        error!("stream loop not started: {e:#}");
    }

    let app = api::router(service.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("herdwatch API listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service.clone()))
        .await?;

    service.stop();
    Ok(())
}

async fn shutdown_signal(service: Arc<DetectionService>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
        service.stop();
    }
}
