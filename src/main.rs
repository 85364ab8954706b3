use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use boxoffice::config::AppConfig;
use boxoffice::db::SqliteBookingStore;
use boxoffice::handlers;
use boxoffice::services;
use boxoffice::services::booking::BookingOrchestrator;
use boxoffice::services::inventory::http::HttpInventoryClient;
use boxoffice::services::notification::http::HttpNotificationClient;
use boxoffice::services::payment::http::HttpPaymentClient;
use boxoffice::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store = SqliteBookingStore::open(&config.database_url)?;
    let http = services::http_client(config.upstream_timeout)?;

    tracing::info!(
        events = %config.event_service_url,
        payments = %config.payment_service_url,
        notifications = %config.notification_service_url,
        timeout_ms = config.upstream_timeout.as_millis() as u64,
        "upstream services configured"
    );
    if config.admin_token == "changeme" {
        tracing::warn!("ADMIN_TOKEN is not set; admin endpoints use the default token");
    }

    let orchestrator = BookingOrchestrator::new(
        Arc::new(store),
        Arc::new(HttpInventoryClient::new(config.event_service_url.clone(), http.clone())),
        Arc::new(HttpPaymentClient::new(config.payment_service_url.clone(), http.clone())),
        Arc::new(HttpNotificationClient::new(config.notification_service_url.clone(), http)),
    )
    .with_background_notifications(config.background_notifications);

    let state = Arc::new(AppState {
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
