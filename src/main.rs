//! Quillpost binary entry point

use std::time::Duration;

use quillpost::{AppState, config, data::storage_registry, queue::queue_registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState from the backend registries
/// 5. Start background tasks (actor cache pruning)
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("QUILLPOST__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "quillpost=info,tower_http=debug".into())
    };

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Quillpost...");

    // 2. Initialize metrics
    quillpost::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        hostname = %config.server.hostname,
        protocol = %config.server.protocol,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let storage = storage_registry();
    let queues = queue_registry();
    let state = AppState::new(config.clone(), &storage, &queues).await?;

    // 5. Start background tasks
    if config.federation.actor_cache_ttl_secs > 0 {
        spawn_cache_prune_task(state.clone(), config.federation.actor_cache_ttl_secs);
    }

    // 6. Start HTTP server
    let app = quillpost::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn background task dropping expired actor cache entries
fn spawn_cache_prune_task(state: AppState, ttl_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(ttl_secs));
        // The first tick fires immediately; nothing has expired yet
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Some(cache) = state.resolver.cache() {
                cache.prune_expired().await;
                let stats = cache.stats().await;
                tracing::debug!(
                    entries = stats.total_entries,
                    "Pruned actor cache"
                );
            }
        }
    });

    tracing::info!("Actor cache prune task spawned");
}
