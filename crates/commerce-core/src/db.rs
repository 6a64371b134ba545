//! Database Pool and Schema
//!
//! SQLite through `sqlx`. Every state-mutating operation runs inside an
//! explicit `sqlx::Transaction`; dropping one without `commit` rolls back.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::{CoreError, Result};
use crate::status;

/// Shared connection pool
pub type DbPool = SqlitePool;

/// Schema statements, applied in order on every startup
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS order_statuses (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE COLLATE NOCASE,
        color TEXT NOT NULL,
        sort_order INTEGER NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
        stock_quantity INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        version INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS product_variants (
        id TEXT PRIMARY KEY,
        product_id TEXT NOT NULL REFERENCES products(id),
        name TEXT NOT NULL,
        price_cents INTEGER CHECK (price_cents >= 0),
        stock_quantity INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        version INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id BLOB PRIMARY KEY,
        order_number TEXT NOT NULL UNIQUE,
        user_id TEXT,
        status_id INTEGER NOT NULL REFERENCES order_statuses(id),
        payment_status TEXT NOT NULL,
        subtotal_cents INTEGER NOT NULL,
        tax_cents INTEGER NOT NULL,
        shipping_cost_cents INTEGER NOT NULL,
        discount_cents INTEGER NOT NULL,
        total_cents INTEGER NOT NULL,
        payment_method TEXT NOT NULL,
        shipping_method TEXT,
        cancellation_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        completed_at TEXT,
        cancelled_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS order_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id BLOB NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        product_id TEXT NOT NULL,
        variant_id TEXT,
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        price_cents INTEGER NOT NULL,
        total_cents INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id BLOB NOT NULL REFERENCES orders(id),
        transaction_type TEXT NOT NULL,
        payment_method TEXT NOT NULL,
        amount_cents INTEGER NOT NULL,
        status TEXT NOT NULL,
        gateway_reference TEXT,
        gateway_response TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_order ON transactions(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status_id)",
    // One successful payment per gateway reference
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_settled_reference
        ON transactions(gateway_reference)
        WHERE status = 'success' AND transaction_type = 'payment'",
];

/// Open a pool for a file-backed database (`sqlite://path.db`)
pub async fn connect(database_url: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| CoreError::Config(format!("invalid DATABASE_URL: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    tracing::info!(url = %database_url, "Connected to database");
    Ok(pool)
}

/// Open a single-connection in-memory pool (tests, demos).
///
/// The connection is never recycled, otherwise the database would vanish.
pub async fn connect_in_memory() -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| CoreError::Config(e.to_string()))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create tables and seed the status catalog
pub async fn migrate(pool: &DbPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    status::seed_catalog(&mut tx).await?;
    tx.commit().await?;

    tracing::debug!(statements = SCHEMA.len(), "Schema applied");
    Ok(())
}

/// A product to register in the catalog
#[derive(Clone, Debug)]
pub struct NewProduct<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub price_cents: i64,
    pub stock_quantity: i64,
}

/// A variant to register under an existing product
#[derive(Clone, Debug)]
pub struct NewVariant<'a> {
    pub id: &'a str,
    pub product_id: &'a str,
    pub name: &'a str,
    /// `None` inherits the product price
    pub price_cents: Option<i64>,
    pub stock_quantity: i64,
}

pub async fn insert_product(conn: &mut SqliteConnection, product: &NewProduct<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO products (id, name, price_cents, stock_quantity, is_active, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(product.id)
    .bind(product.name)
    .bind(product.price_cents)
    .bind(product.stock_quantity)
    .bind(product.stock_quantity > 0)
    .bind(chrono::Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_variant(conn: &mut SqliteConnection, variant: &NewVariant<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO product_variants
            (id, product_id, name, price_cents, stock_quantity, is_active, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(variant.id)
    .bind(variant.product_id)
    .bind(variant.name)
    .bind(variant.price_cents)
    .bind(variant.stock_quantity)
    .bind(variant.stock_quantity > 0)
    .bind(chrono::Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Seed a small demo catalog when the products table is empty
pub async fn seed_demo_catalog(pool: &DbPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        tracing::debug!(existing, "Catalog already populated, skipping demo seed");
        return Ok(());
    }

    let products = [
        NewProduct { id: "FT-TEE", name: "Playera clásica", price_cents: 34900, stock_quantity: 40 },
        NewProduct { id: "FT-MUG", name: "Taza de cerámica", price_cents: 19900, stock_quantity: 25 },
        NewProduct { id: "FT-CAP", name: "Gorra bordada", price_cents: 29900, stock_quantity: 0 },
    ];
    for product in &products {
        insert_product(&mut tx, product).await?;
    }

    let variants = [
        NewVariant { id: "FT-TEE-S", product_id: "FT-TEE", name: "Chica", price_cents: None, stock_quantity: 10 },
        NewVariant { id: "FT-TEE-M", product_id: "FT-TEE", name: "Mediana", price_cents: None, stock_quantity: 15 },
        NewVariant { id: "FT-TEE-XL", product_id: "FT-TEE", name: "Extra grande", price_cents: Some(37900), stock_quantity: 5 },
    ];
    for variant in &variants {
        insert_variant(&mut tx, variant).await?;
    }

    tx.commit().await?;
    tracing::info!(products = products.len(), variants = variants.len(), "Seeded demo catalog");
    Ok(())
}
