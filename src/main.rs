//! Autoshelf: audiobook ingestion and library organization service
//!
//! Watches an inbox for arriving audiobook files, identifies them from
//! embedded tags, filenames and external metadata providers, and moves
//! them into a canonical Author/Series/Title library layout. A small
//! REST API exposes the review queue for matches that need a human.

mod api;
mod app;
mod config;
mod pipeline;
mod services;
mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::watcher::InboxWatcher;

pub use app::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoshelf=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting autoshelf");
    tracing::info!(
        input = %config.input_dir.display(),
        output = %config.output_dir.display(),
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.input_dir)
        .with_context(|| format!("Failed to create {}", config.input_dir.display()))?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let pipeline = Arc::new(Pipeline::new(Arc::clone(&config))?);
    pipeline.restore_queue();

    let (watcher, events) = InboxWatcher::new(&config.input_dir)?;
    let pipeline_task = tokio::spawn(Arc::clone(&pipeline).run(events));
    tracing::info!("Ingestion pipeline started");

    let state = AppState {
        config: Arc::clone(&config),
        pipeline,
    };
    let app = app::build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dropping the watcher closes the event channel; the pipeline loop
    // drains and exits.
    drop(watcher);
    let _ = pipeline_task.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
