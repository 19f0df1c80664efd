// Main entry point - Dependency injection, task startup and shutdown
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::history_service::HistoryService;
use crate::application::ingest_service::IngestService;
use crate::application::render_scheduler::RenderScheduler;
use crate::application::sinks::{StatusFanout, StatusSink};
use crate::application::telemetry_buffer::TelemetryBuffer;
use crate::infrastructure::config::load_collector_config;
use crate::infrastructure::frame_store::FrameStore;
use crate::infrastructure::history_api::ApiHistoryRepository;
use crate::infrastructure::mqtt_ingestor::MqttIngestor;
use crate::infrastructure::tracing_status::TracingStatusSink;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    buffer_status, health_check, latest_frame, reset_buffer, stream_frames,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = load_collector_config().context("Failed to load collector configuration")?;
    let capacity = config.buffer.capacity()?;
    let window = config.history.window()?;
    let tick = config.render.tick()?;
    let policy = config.retry.policy()?;

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid server.bind address {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Live path: buffer and sinks
    let buffer = Arc::new(TelemetryBuffer::new(capacity));
    let frames = Arc::new(FrameStore::new());
    let status = Arc::new(StatusFanout::new(vec![
        Arc::new(TracingStatusSink::new(&config.broker.topic)) as Arc<dyn StatusSink>,
        frames.clone(),
    ]));

    // History path: one-shot fetch, isolated from ingestion
    let repository = Arc::new(ApiHistoryRepository::new(
        config.history.base_url.clone(),
        config.history.api_key.clone(),
        Arc::new(config.history.sensor.clone()),
    ));
    let history = HistoryService::new(repository, window).spawn();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Render flow
    let scheduler = RenderScheduler::new(
        buffer.clone(),
        history,
        frames.clone(),
        tick,
    );
    let render_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    // Ingestion flow, retried in the background until a session is up
    let ingest = IngestService::new(buffer.clone(), status);
    let ingest_task = tokio::spawn(MqttIngestor::serve(
        config.broker.clone(),
        policy,
        ingest,
        shutdown_rx.clone(),
    ));

    // HTTP read surface
    let state = Arc::new(AppState { frames, buffer });
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/frame", get(latest_frame))
        .route("/frames/stream", get(stream_frames))
        .route("/buffer", get(buffer_status).delete(reset_buffer))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Starting sensor-collector on {}", addr);

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    // Drain in-flight work
    match ingest_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Ingestion stopped: {}", e),
        Err(e) => tracing::error!("Ingestion task panicked: {}", e),
    }
    render_task.await.context("Render task panicked")?;
    server.await.context("HTTP server task panicked")??;

    tracing::info!("sensor-collector stopped");
    Ok(())
}
