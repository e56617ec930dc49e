//! Main entry point for the image generation gateway

use gen_failover_gateway::{
    api,
    config::Settings,
    gateway::{health_check::PoolHealthChecker, AdmissionController, BackendPool, DispatchEngine},
    storage::ResultStore,
    AppState,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    if settings.logging.format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    }

    info!("Starting image generation gateway");
    info!(
        "Loaded configuration: server={}:{}",
        settings.server.host, settings.server.port
    );

    let settings = Arc::new(settings);

    let admission = Arc::new(AdmissionController::new(settings.dispatch.admission_limit));
    let pool = Arc::new(BackendPool::from_config(&settings.pool.workers)?);
    let store = Arc::new(ResultStore::from_config(&settings.storage)?);

    let engine = Arc::new(DispatchEngine::from_settings(
        &settings,
        admission,
        pool.clone(),
        store,
    )?);

    // Start the idle worker prober
    let health_checker = PoolHealthChecker::new(pool, engine.connector());
    health_checker
        .start(settings.pool.health_check_interval_secs)
        .await;

    let app_state = Arc::new(AppState::new(settings.clone(), engine));
    let app = api::routes::create_router(app_state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    health_checker.stop().await;
    Ok(())
}
