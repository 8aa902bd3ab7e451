/// Main application entry point with clean architecture
mod clients;
mod config;
mod domain;
mod errors;
mod handlers;
mod processing;
mod repo;
mod routes;
mod services;
mod utils;

use crate::clients::donki::{DonkiClient, DonkiConfig};
use crate::clients::swpc::{SwpcClient, SwpcConfig};
use crate::clients::ReqwestTransport;
use crate::config::AppConfig;
use crate::handlers::AppState;
use crate::repo::{init_db, KeyValueStore, MemoryStore, PgStore};
use crate::routes::build_router;
use crate::services::poller::RealTimePoller;
use crate::services::story::{HttpStoryGenerator, StoryService};
use crate::services::WeatherService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");

    // Persistence is best-effort: the service runs fully in-memory when no
    // database is configured or reachable.
    let store = build_store(&config).await;

    let timings = &config.timings;

    // Initialize clients
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(
        timings.request_timeout_secs,
    ))?);
    let donki = Arc::new(DonkiClient::new(
        transport.clone(),
        DonkiConfig {
            base_url: config.donki_base_url.clone(),
            api_key: config.donki_api_key.clone(),
            rate_limit_delay: Duration::from_millis(timings.rate_limit_delay_ms),
            cache_ttl: Duration::from_secs(timings.fetch_cache_ttl_secs),
            fallback_ttl: Duration::from_secs(timings.fallback_cache_ttl_secs),
        },
    ));
    let swpc = Arc::new(SwpcClient::new(
        transport.clone(),
        SwpcConfig {
            base_url: config.swpc_base_url.clone(),
            cache_ttl: Duration::from_secs(timings.conditions_ttl_secs),
            synthetic_seed: None,
        },
    ));

    // Initialize services
    let weather_service = Arc::new(WeatherService::new(
        donki,
        swpc,
        store.clone(),
        Duration::from_secs(timings.bundle_ttl_secs),
        Duration::from_secs(timings.min_refresh_secs),
    ));

    let generator = Arc::new(HttpStoryGenerator::new(
        config.generation_api_url.clone(),
        config.generation_api_key.clone(),
        Duration::from_secs(timings.generation_timeout_secs),
    )?);
    let story_service = Arc::new(StoryService::new(
        generator,
        config.generation_models.clone(),
        store.clone(),
        timings.story_history_max,
    ));

    // Start the background poller with a logging subscriber
    let poller = RealTimePoller::new(weather_service.clone());
    let _subscription = poller.subscribe(|events| {
        for event in events {
            info!(
                "significant weather event: {} intensity={:.1} severity={:?}",
                event.id, event.intensity, event.severity_level
            );
        }
    });
    poller.start(Duration::from_secs(timings.poll_interval_minutes * 60));

    // Initialize application state
    let state = AppState {
        weather_service,
        story_service,
    };

    // Build router
    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("stellar-stories service listening on 0.0.0.0:3000");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn build_store(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    let Some(url) = &config.database_url else {
        info!("DATABASE_URL not set, using in-memory store");
        return Arc::new(MemoryStore::new());
    };

    match PgPoolOptions::new().max_connections(5).connect(url).await {
        Ok(pool) => match init_db(&pool).await {
            Ok(()) => {
                info!("Postgres persistence initialized");
                Arc::new(PgStore::new(pool))
            }
            Err(e) => {
                warn!("schema init failed ({}), using in-memory store", e);
                Arc::new(MemoryStore::new())
            }
        },
        Err(e) => {
            warn!("database unreachable ({}), using in-memory store", e);
            Arc::new(MemoryStore::new())
        }
    }
}
