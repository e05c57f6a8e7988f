mod api;
mod cache;
mod classifier;
mod config;
mod error;
mod orchestrator;
mod policy;
mod types;
mod vision;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use api::AppState;
use cache::SqliteVerdictStore;
use config::{Config, VisionConfig};
use orchestrator::BatchFilter;
use policy::VerdictPolicy;
use vision::GoogleVisionClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,safesearch_filter=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!(
        address = %config.server_address(),
        database_url = %config.database_url,
        vision_endpoint = %config.vision_endpoint,
        "Starting safe-search filter"
    );

    if !config.has_vision_credentials() {
        anyhow::bail!("Either --vision-api-key or --vision-access-token must be provided");
    }

    let store = SqliteVerdictStore::connect(&config.database_url).await?;
    tracing::info!("Verdict store ready");

    let vision = Arc::new(GoogleVisionClient::new(VisionConfig::from(&config))?);
    let filter = BatchFilter::new(vision.clone(), Arc::new(store), VerdictPolicy::default());

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::new(filter),
        vision,
        shutdown.clone(),
        config.request_timeout(),
    );

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = api::router(state)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received, canceling in-flight batches");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
