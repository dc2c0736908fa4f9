use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use veyrun::{
    config::Config,
    engine::Engine,
    handlers::*,
    services::*,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting Veyrun agent v{}", env!("CARGO_PKG_VERSION"));

    // Initialize services
    let storage = Arc::new(Storage::open(&config.storage_dir).await?);
    let wallet = Arc::new(WalletService::new(&config, storage.clone()).await?);
    if !wallet.rpc_ok().await {
        tracing::warn!(rpc = %config.rpc_url, "payment RPC unreachable at startup");
    }

    let receipts = Arc::new(ReceiptStore::new(storage));
    let protocol: Arc<dyn ProtocolClient> =
        Arc::new(HttpProtocolClient::new(wallet.clone(), config.demo_mode));
    let pipeline = Arc::new(PaymentPipeline::new(protocol));

    let (events_tx, _) = broadcast::channel(64);
    let surface = Arc::new(BroadcastSurface::new(events_tx.clone()));

    let engine = Engine::spawn(
        config.clone(),
        wallet.clone(),
        pipeline,
        receipts,
        surface,
        events_tx.clone(),
    );

    let health_state = HealthState {
        wallet,
        started_at: Instant::now(),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(health_state)
        .route("/ws/events", get(websocket_handler))
        .with_state(events_tx)
        .route("/v1/message", post(message))
        .route("/v1/intercept", post(intercept))
        .route("/v1/tabs", post(tab_event))
        .with_state(engine)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Agent listening on http://{}", addr);
    tracing::info!("Event socket: ws://{}/ws/events", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for ctrl+c");
        return;
    }
    tracing::info!("Shutting down gracefully...");
}
