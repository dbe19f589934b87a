//! signalfuse -- incident root-cause analysis over operational telemetry.
//!
//! Signals are correlated and scored for anomalousness, fused per
//! correlation group into incidents with temporal, semantic and causal
//! context, and routed through a confidence-gated analysis state machine.

pub mod analysis;
pub mod api;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fusion;
pub mod metrics;
pub mod pipeline;
pub mod signal;
pub mod storage;
pub mod text;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Open the configured store and assemble a pipeline around it.
pub fn build_pipeline(config: &config::Config, metrics: Arc<metrics::PipelineMetrics>) -> Result<pipeline::Pipeline<storage::SqliteStore>> {
    tracing::info!(db_path = %config.storage.path, "Initializing database");
    let store = storage::SqliteStore::open(&config.storage.path)
        .with_context(|| format!("failed to open database {}", config.storage.path))?;
    let pipeline = pipeline::Pipeline::from_config(Arc::new(store), config, metrics)?;
    Ok(pipeline)
}

/// Start the daemon: periodic pipeline driver plus the HTTP API. Returns
/// after Ctrl-C once the in-flight cycle has finished.
pub async fn serve(config: config::Config) -> Result<()> {
    let metrics = Arc::new(metrics::PipelineMetrics::new());
    let pipeline = Arc::new(build_pipeline(&config, metrics)?);

    let (shutdown, rx) = pipeline::driver::Shutdown::new();
    let driver = tokio::spawn(pipeline::driver::run(pipeline.clone(), config.pipeline.interval(), rx));

    let addr: std::net::SocketAddr = config.api.bind.parse()?;
    let app = api::router(api::state::AppState::new(pipeline));

    tracing::info!(%addr, "signalfuse listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut stop = shutdown.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
                _ = stop.changed() => {}
            }
        })
        .await?;

    shutdown.trigger();
    let cycles = driver.await.context("pipeline driver panicked")?;
    tracing::info!(cycles, "signalfuse stopped");
    Ok(())
}
