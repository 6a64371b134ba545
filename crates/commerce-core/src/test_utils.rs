//! Shared fixtures for store-level tests

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::db::{self, DbPool, NewProduct, NewVariant};

pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory database with schema and a small catalog:
///
/// | SKU      | price  | stock |
/// |----------|--------|-------|
/// | P1       | 100.00 | 10    |
/// | P1-RED   | (P1)   | 5     |
/// | P2       | 50.00  | 3     |
/// | P3       | 25.00  | 20    |
pub(crate) async fn setup_catalog() -> DbPool {
    init_test_tracing();

    let pool = db::connect_in_memory().await.expect("in-memory pool");
    seed_catalog(&pool).await;
    pool
}

/// Same catalog in a fresh WAL database file, for tests that need more
/// than one connection. Returns the file path for cleanup.
pub(crate) async fn setup_catalog_file() -> (DbPool, PathBuf) {
    init_test_tracing();

    let path = std::env::temp_dir().join(format!("commerce-test-{}.db", Uuid::new_v4().simple()));
    let pool = db::connect(&format!("sqlite://{}", path.display()))
        .await
        .expect("file pool");
    seed_catalog(&pool).await;
    (pool, path)
}

async fn seed_catalog(pool: &DbPool) {
    db::migrate(pool).await.expect("schema");

    let mut conn = pool.acquire().await.expect("connection");
    for product in [
        NewProduct { id: "P1", name: "Product one", price_cents: 10_000, stock_quantity: 10 },
        NewProduct { id: "P2", name: "Product two", price_cents: 5_000, stock_quantity: 3 },
        NewProduct { id: "P3", name: "Product three", price_cents: 2_500, stock_quantity: 20 },
    ] {
        db::insert_product(&mut conn, &product).await.expect("product");
    }
    db::insert_variant(
        &mut conn,
        &NewVariant {
            id: "P1-RED",
            product_id: "P1",
            name: "Red",
            price_cents: None,
            stock_quantity: 5,
        },
    )
    .await
    .expect("variant");
}
