use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use murmur_hub::{Backends, Hub, HubHandle, LocalBus, MessageBus};
use serde_json::json;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::blob::FsBlobStore;
use crate::bus::{run_redis_subscriber, RedisBus};
use crate::config::{BusKind, ServerConfig};
use crate::db::ChatStore;

mod routes;

/// Server application state
pub struct AppState {
    pub hub: HubHandle,
    /// Where client actors send inbound envelopes
    pub bus: Arc<dyn MessageBus>,
    pub store: Arc<ChatStore>,
    pub blobs: FsBlobStore,
    /// Outbound queue capacity for each new session
    pub outbound_capacity: usize,
}

/// Wire up storage, the hub and the bus, then serve HTTP until Ctrl-C.
pub async fn start(config: ServerConfig) -> Result<()> {
    let store = Arc::new(ChatStore::open(config.storage.database_path.as_deref()).await?);
    store.migrate().await?;
    let blobs = FsBlobStore::open(&config.storage.static_path).await?;

    let hub = Hub::spawn(
        config.hub.hub_config(),
        Backends {
            groups: store.clone(),
            profiles: store.clone(),
            persistence: store.clone(),
            blobs: Arc::new(blobs.clone()),
        },
    );

    let bus: Arc<dyn MessageBus> = match config.bus.kind {
        BusKind::Local => Arc::new(LocalBus::new(hub.clone())),
        BusKind::Redis => {
            let client = redis::Client::open(config.bus.redis_url.as_str())
                .context("Invalid Redis URL")?;
            let bus = RedisBus::connect(&client, &config.bus.channel).await?;
            tokio::spawn(run_redis_subscriber(
                client,
                config.bus.channel.clone(),
                hub.clone(),
            ));
            Arc::new(bus)
        }
    };
    info!(bus = bus.name(), "Message bus ready");

    let state = Arc::new(AppState {
        hub,
        bus,
        store,
        blobs,
        outbound_capacity: config.hub.outbound_queue_capacity,
    });

    let app = create_router(state);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", config.listen_addr))?;
    info!("Starting Axum HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Create the Axum router with all routes and middleware
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .merge(routes::websocket::router(state.clone()))
        .merge(routes::files::router(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub_running = state.hub.is_running();
    let db_healthy = state.store.health_check().await;
    let healthy = hub_running && db_healthy;

    if !healthy {
        warn!(hub_running, db_healthy, "Health check failed");
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": "murmur-server",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": state.hub.session_count(),
        })),
    )
}
