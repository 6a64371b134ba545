//! Commerce HTTP Server
//!
//! Axum-based server for the order lifecycle and payment settlement.

mod auth;
mod config;
mod error;
mod handlers;
mod routes;
mod state;

use commerce_core::db;
use commerce_payments::{GatewayRegistry, PaymentsConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Database
    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;
    if config.seed_demo_catalog {
        db::seed_demo_catalog(&pool).await?;
    }

    // Payment providers, each from its own explicit configuration
    let gateways = GatewayRegistry::from_config(&PaymentsConfig::from_env())?;
    if gateways.providers().is_empty() {
        tracing::warn!("⚠ No payment provider configured - checkout disabled");
        tracing::warn!("  Set provider credentials (or PAYMENTS_MOCK=true) in .env");
    }

    if config.jwt_secret.is_none() {
        tracing::warn!("JWT_SECRET not set - bearer tokens are ignored");
    }
    if config.allow_oversell {
        tracing::info!("Oversell allowed: stock may go negative on settlement");
    }

    let addr = config.bind_addr.clone();
    let state = AppState::new(config, pool, gateways);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 commerce server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  POST /orders/create               - Create pending order");
    tracing::info!("  POST /orders/cancel               - Cancel order");
    tracing::info!("  POST /orders/update-status        - Change order status");
    tracing::info!("  GET  /orders                      - List or fetch orders");
    tracing::info!("  POST /payments/{{provider}}/create  - Start checkout");
    tracing::info!("  POST /payments/{{provider}}/confirm - Settle from provider status");
    tracing::info!("  POST /payments/{{provider}}/webhook - Provider notifications");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
