//! Quillpost - an ActivityPub delivery and inbox engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - WebFinger / host-meta                                    │
//! │  - Actors, inboxes, collections                             │
//! │  - Admin and metrics endpoints                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Service / Federation Layer                    │
//! │  - Accounts, posts, boosts, follows                         │
//! │  - Signatures, fan-out, delivery, inbox state machine       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Data Layer / Delivery Queue                  │
//! │  - sqlite://, memory://, null:// storage                    │
//! │  - inline://, channel://, log://, discard:// queues         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Account and post operations
//! - `federation`: ActivityPub federation handling
//! - `queue`: Delivery queue backends
//! - `data`: Storage contracts, backends and secrets
//! - `registry`: URI-scheme backend registries
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus metrics

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use data::Storage;
use queue::{DeliveryQueue, QueueContext};
use registry::Registry;

/// Maximum accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
///
/// Cloned for each request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Storage collaborators
    pub storage: Storage,

    /// WebFinger and actor lookups
    pub resolver: Arc<federation::ActorResolver>,

    pub fanout: federation::FanOut,
    pub inbox: federation::InboxProcessor,
    pub accounts: service::AccountService,
    pub posts: service::PostService,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Open storage through the storage registry
    /// 2. Build the HTTP client and actor resolver
    /// 3. Open the delivery queue through the queue registry
    /// 4. Wire federation components and services
    ///
    /// # Errors
    /// Returns error if storage or the queue cannot be opened
    pub async fn new(
        config: config::AppConfig,
        storage_registry: &Registry<(), Storage>,
        queue_registry: &Registry<QueueContext, Arc<dyn DeliveryQueue>>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Storage
        let storage = storage_registry.open(&config.database.uri, ()).await?;
        tracing::info!(uri = %config.database.uri, "Storage opened");

        // 2. HTTP client and resolver
        let federation = &config.federation;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Quillpost/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(federation.request_timeout_secs))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let hostname = config.server.hostname.clone();
        let base_url = config.server.base_url();
        let resolver = Arc::new(federation::ActorResolver::new(
            http_client.clone(),
            hostname.clone(),
            federation.allow_insecure_transport,
            Duration::from_secs(federation.actor_cache_ttl_secs),
        ));

        let dispatcher = federation::ActivityDispatcher::new(
            storage.clone(),
            resolver.clone(),
            http_client,
            base_url.clone(),
            federation.signature_algorithm,
            Duration::from_secs(federation.signature_validity_secs),
        );

        // 3. Delivery queue
        let queue = queue_registry
            .open(
                &config.queue.uri,
                QueueContext {
                    dispatcher: dispatcher.clone(),
                    storage: storage.clone(),
                    max_attempts: federation.max_delivery_attempts,
                },
            )
            .await?;
        tracing::info!(uri = %config.queue.uri, "Delivery queue opened");

        // 4. Federation and services
        let fanout = federation::FanOut::new(
            storage.clone(),
            queue,
            hostname.clone(),
            federation.allow_mentions,
            federation.allow_copy_recipients,
        );
        let inbox = federation::InboxProcessor::new(
            storage.clone(),
            federation::SignatureVerifier::new(resolver.clone()),
            base_url.clone(),
            hostname.clone(),
        );
        let accounts = service::AccountService::new(
            storage.clone(),
            resolver.clone(),
            dispatcher,
            base_url.clone(),
            hostname.clone(),
            config.accounts.key_dir.clone(),
            config.accounts.key_bits,
            federation.max_delivery_attempts,
        );
        let posts = service::PostService::new(
            storage.clone(),
            resolver.clone(),
            fanout.clone(),
            base_url,
            hostname,
            federation.allow_mentions,
        );

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            storage,
            resolver,
            fanout,
            inbox,
            accounts,
            posts,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower::ServiceBuilder;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    // Outermost first: trace, compress, then cap the body
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    Router::new()
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .nest("/admin", api::admin_router())
        .layer(middleware)
        .with_state(state)
        .merge(api::metrics_router())
}
