//! Inventory Ledger
//!
//! Per-SKU stock counts for products and product variants. All mutations
//! take a connection so they compose into the caller's transaction; a batch
//! that fails halfway is undone by the caller's rollback.
//!
//! Each SKU row carries a `version` counter. Updates are conditional on the
//! version read in the same transaction, so a concurrent writer surfaces as
//! [`CoreError::ConcurrentModification`] instead of a lost update.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::error::{CoreError, Result};
use crate::model::{SkuRef, StockLine};

/// Which table a SKU lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuKind {
    Product,
    Variant,
}

impl SkuKind {
    fn table(self) -> &'static str {
        match self {
            SkuKind::Product => "products",
            SkuKind::Variant => "product_variants",
        }
    }
}

/// Current stock record of a SKU
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StockLevel {
    pub kind: SkuKind,
    pub id: String,
    pub product_id: String,
    pub stock_quantity: i64,
    pub is_active: bool,
    pub version: i64,
}

/// Availability of one requested line
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Availability {
    #[serde(flatten)]
    pub sku: SkuRef,
    pub requested: i64,
    pub stock_quantity: i64,
    pub sufficient: bool,
}

#[derive(sqlx::FromRow)]
struct SkuRow {
    id: String,
    product_id: String,
    stock_quantity: i64,
    is_active: bool,
    version: i64,
}

/// Stock ledger with the configured oversell policy
#[derive(Clone, Copy, Debug)]
pub struct InventoryLedger {
    allow_oversell: bool,
}

impl Default for InventoryLedger {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InventoryLedger {
    /// `allow_oversell` lets stock go negative instead of failing the debit
    pub fn new(allow_oversell: bool) -> Self {
        Self { allow_oversell }
    }

    /// Resolve a SKU reference, preferring the variant when one is given
    pub async fn locate(&self, conn: &mut SqliteConnection, sku: &SkuRef) -> Result<StockLevel> {
        let (kind, row) = match (&sku.variant_id, &sku.product_id) {
            (Some(variant_id), product_id) => {
                let row = sqlx::query_as::<_, SkuRow>(
                    "SELECT id, product_id, stock_quantity, is_active, version
                     FROM product_variants WHERE id = ?1",
                )
                .bind(variant_id)
                .fetch_optional(&mut *conn)
                .await?;

                if let (Some(found), Some(product_id)) = (&row, product_id) {
                    if &found.product_id != product_id {
                        return Err(CoreError::Validation(format!(
                            "variant {variant_id} does not belong to product {product_id}"
                        )));
                    }
                }
                (SkuKind::Variant, row)
            }
            (None, Some(product_id)) => {
                let row = sqlx::query_as::<_, SkuRow>(
                    "SELECT id, id AS product_id, stock_quantity, is_active, version
                     FROM products WHERE id = ?1",
                )
                .bind(product_id)
                .fetch_optional(&mut *conn)
                .await?;
                (SkuKind::Product, row)
            }
            (None, None) => {
                return Err(CoreError::Validation(
                    "item needs a product_id or a variant_id".into(),
                ));
            }
        };

        let row = row.ok_or_else(|| CoreError::NotFound(format!("SKU {sku}")))?;
        Ok(StockLevel {
            kind,
            id: row.id,
            product_id: row.product_id,
            stock_quantity: row.stock_quantity,
            is_active: row.is_active,
            version: row.version,
        })
    }

    /// Decrease stock by `quantity`.
    ///
    /// With oversell allowed the count may go negative; visibility is fixed
    /// up by [`reconcile_visibility`](Self::reconcile_visibility).
    pub async fn debit(
        &self,
        conn: &mut SqliteConnection,
        sku: &SkuRef,
        quantity: i64,
    ) -> Result<StockLevel> {
        check_quantity(sku, quantity)?;
        let current = self.locate(conn, sku).await?;

        if !self.allow_oversell && current.stock_quantity < quantity {
            return Err(CoreError::InsufficientStock {
                sku: sku.to_string(),
                requested: quantity,
                available: current.stock_quantity,
            });
        }

        let updated = apply_delta(conn, &current, -quantity).await?;
        if updated.stock_quantity < 0 {
            tracing::warn!(
                sku = %sku,
                stock = updated.stock_quantity,
                "Stock went negative (oversold)"
            );
        }
        tracing::debug!(sku = %sku, quantity, stock = updated.stock_quantity, "Debited stock");
        Ok(updated)
    }

    /// Restore `quantity` units (cancellation, refund)
    pub async fn credit(
        &self,
        conn: &mut SqliteConnection,
        sku: &SkuRef,
        quantity: i64,
    ) -> Result<StockLevel> {
        check_quantity(sku, quantity)?;
        let current = self.locate(conn, sku).await?;
        let updated = apply_delta(conn, &current, quantity).await?;
        tracing::debug!(sku = %sku, quantity, stock = updated.stock_quantity, "Credited stock");
        Ok(updated)
    }

    /// Debit every line; the first failure aborts the batch
    pub async fn debit_batch(
        &self,
        conn: &mut SqliteConnection,
        lines: &[StockLine],
    ) -> Result<Vec<StockLevel>> {
        let mut levels = Vec::with_capacity(lines.len());
        for line in lines {
            levels.push(self.debit(conn, &line.sku, line.quantity).await?);
        }
        Ok(levels)
    }

    /// Credit every line; the first failure aborts the batch
    pub async fn credit_batch(
        &self,
        conn: &mut SqliteConnection,
        lines: &[StockLine],
    ) -> Result<Vec<StockLevel>> {
        let mut levels = Vec::with_capacity(lines.len());
        for line in lines {
            levels.push(self.credit(conn, &line.sku, line.quantity).await?);
        }
        Ok(levels)
    }

    /// Hide every active SKU whose stock is at or below zero.
    ///
    /// Returns how many rows were flipped; zero matches is not an error.
    pub async fn reconcile_visibility(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let mut hidden = 0;
        for kind in [SkuKind::Product, SkuKind::Variant] {
            let sql = format!(
                "UPDATE {} SET is_active = 0, updated_at = ?1
                 WHERE stock_quantity <= 0 AND is_active = 1",
                kind.table()
            );
            hidden += sqlx::query(&sql)
                .bind(Utc::now())
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        if hidden > 0 {
            tracing::info!(hidden, "Hid out-of-stock SKUs");
        }
        Ok(hidden)
    }

    /// Administrative stock adjustment: debit a batch and hide sold-out SKUs
    /// in one transaction.
    #[tracing::instrument(skip(self, pool, lines), fields(lines = lines.len()))]
    pub async fn apply_debits(&self, pool: &DbPool, lines: &[StockLine]) -> Result<Vec<StockLevel>> {
        if lines.is_empty() {
            return Err(CoreError::Validation("items must not be empty".into()));
        }

        let mut tx = pool.begin().await?;
        let result = async {
            let levels = self.debit_batch(&mut tx, lines).await?;
            self.reconcile_visibility(&mut tx).await?;
            Ok::<_, CoreError>(levels)
        }
        .await;

        match result {
            Ok(levels) => {
                tx.commit().await?;
                Ok(levels)
            }
            Err(e) => {
                tx.rollback().await?;
                tracing::warn!(error = %e, "Stock adjustment rolled back");
                Err(e)
            }
        }
    }

    /// Compare requested quantities with current stock and hide sold-out
    /// SKUs. Does not debit anything.
    pub async fn check_availability(
        &self,
        pool: &DbPool,
        lines: &[StockLine],
    ) -> Result<Vec<Availability>> {
        let mut tx = pool.begin().await?;
        let mut report = Vec::with_capacity(lines.len());
        for line in lines {
            check_quantity(&line.sku, line.quantity)?;
            let level = self.locate(&mut tx, &line.sku).await?;
            report.push(Availability {
                sku: line.sku.clone(),
                requested: line.quantity,
                stock_quantity: level.stock_quantity,
                sufficient: level.is_active && level.stock_quantity >= line.quantity,
            });
        }
        self.reconcile_visibility(&mut tx).await?;
        tx.commit().await?;
        Ok(report)
    }

    /// Read one SKU outside any caller transaction
    pub async fn stock(&self, pool: &DbPool, sku: &SkuRef) -> Result<StockLevel> {
        let mut conn = pool.acquire().await?;
        self.locate(&mut conn, sku).await
    }
}

fn check_quantity(sku: &SkuRef, quantity: i64) -> Result<()> {
    if quantity <= 0 {
        return Err(CoreError::Validation(format!(
            "quantity for {sku} must be positive, got {quantity}"
        )));
    }
    Ok(())
}

async fn apply_delta(
    conn: &mut SqliteConnection,
    current: &StockLevel,
    delta: i64,
) -> Result<StockLevel> {
    let sql = format!(
        "UPDATE {} SET stock_quantity = stock_quantity + ?1, version = version + 1, updated_at = ?2
         WHERE id = ?3 AND version = ?4",
        current.kind.table()
    );
    let affected = sqlx::query(&sql)
        .bind(delta)
        .bind(Utc::now())
        .bind(&current.id)
        .bind(current.version)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(CoreError::ConcurrentModification(current.id.clone()));
    }

    Ok(StockLevel {
        stock_quantity: current.stock_quantity + delta,
        version: current.version + 1,
        ..current.clone()
    })
}
