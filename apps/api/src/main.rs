mod callouts;
mod config;
mod db;
mod errors;
mod jobs;
mod models;
mod routes;
mod source;
mod state;
mod store;
mod telephony;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::callouts::engine::CalloutEngine;
use crate::callouts::ingest::CompletionIngest;
use crate::callouts::scheduler::ScheduleRunner;
use crate::config::Config;
use crate::db::create_pool;
use crate::jobs::sync::RecordSync;
use crate::routes::build_router;
use crate::source::SourceClient;
use crate::state::AppState;
use crate::store::postgres::PgCalloutStore;
use crate::store::CalloutStore;
use crate::telephony::VendorClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Callout API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url, config.db_max_connections).await?;
    let store: Arc<dyn CalloutStore> = Arc::new(PgCalloutStore::new(db));

    // Outbound HTTP clients
    let telephony = Arc::new(VendorClient::new(Duration::from_secs(config.vendor_timeout_secs))?);
    let source = Arc::new(SourceClient::new(Duration::from_secs(config.source_timeout_secs))?);
    info!(
        "HTTP clients initialized (vendor timeout {}s, source timeout {}s)",
        config.vendor_timeout_secs, config.source_timeout_secs
    );

    let engine = Arc::new(CalloutEngine::new(
        store.clone(),
        telephony,
        config.default_timezone,
    ));
    let sync = Arc::new(RecordSync::new(store.clone(), source.clone()));
    let ingest = Arc::new(CompletionIngest::new(store.clone(), source, config.default_timezone));
    let scheduler = Arc::new(ScheduleRunner::new(
        store.clone(),
        sync.clone(),
        engine.clone(),
        Duration::from_secs(config.scheduler_poll_secs.max(1)),
    ));

    if config.scheduler_enabled {
        scheduler.start().await;
    } else {
        info!("Schedule runner disabled (SCHEDULER_ENABLED=false)");
    }

    // Build app state
    let state = AppState {
        store,
        engine,
        sync,
        ingest,
        scheduler: scheduler.clone(),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
