//! Order Store
//!
//! Authoritative persistence of orders and order lines. Public methods on
//! [`OrderStore`] open their own transaction; the free functions take a
//! connection so the settlement coordinator can compose them into its own.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{CoreError, Result, is_unique_violation};
use crate::inventory::InventoryLedger;
use crate::model::{
    NewOrder, NewOrderItem, Order, OrderItem, OrderTotals, from_cents, generate_order_number,
    to_cents,
};
use crate::status::{OrderStatus, PaymentStatus, StatusCatalogEntry, list_catalog};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

const ORDER_COLUMNS: &str = "id, order_number, user_id, status_id, payment_status, \
     subtotal_cents, tax_cents, shipping_cost_cents, discount_cents, total_cents, \
     payment_method, shipping_method, cancellation_reason, \
     created_at, updated_at, completed_at, cancelled_at";

/// Listing filter
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Option<String>,
    status_id: i64,
    payment_status: String,
    subtotal_cents: i64,
    tax_cents: i64,
    shipping_cost_cents: i64,
    discount_cents: i64,
    total_cents: i64,
    payment_method: String,
    shipping_method: Option<String>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    order_id: Uuid,
    product_id: String,
    variant_id: Option<String>,
    quantity: i64,
    price_cents: i64,
    total_cents: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        let status = OrderStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Config(format!(
                "order {} has unknown status id {}",
                self.order_number, self.status_id
            ))
        })?;
        let payment_status = PaymentStatus::parse(&self.payment_status).ok_or_else(|| {
            CoreError::Config(format!(
                "order {} has unknown payment status '{}'",
                self.order_number, self.payment_status
            ))
        })?;

        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            status,
            payment_status,
            subtotal: from_cents(self.subtotal_cents),
            tax: from_cents(self.tax_cents),
            shipping_cost: from_cents(self.shipping_cost_cents),
            discount: from_cents(self.discount_cents),
            total: from_cents(self.total_cents),
            payment_method: self.payment_method,
            shipping_method: self.shipping_method,
            cancellation_reason: self.cancellation_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            items,
        })
    }
}

impl From<ItemRow> for OrderItem {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            quantity: row.quantity,
            price: from_cents(row.price_cents),
            total: from_cents(row.total_cents),
        }
    }
}

/// Order persistence and status transitions
#[derive(Clone)]
pub struct OrderStore {
    pool: DbPool,
    ledger: InventoryLedger,
}

impl OrderStore {
    pub fn new(pool: DbPool, ledger: InventoryLedger) -> Self {
        Self { pool, ledger }
    }

    /// Create an order in Pending/pending with its lines, as one unit
    #[tracing::instrument(skip(self, draft), fields(items = draft.items.len()))]
    pub async fn create_pending_order(&self, draft: NewOrder) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let order = insert_pending(&mut tx, &draft).await?;
        tx.commit().await?;

        tracing::info!(
            order_number = %order.order_number,
            total = %order.total,
            "Created pending order"
        );
        Ok(order)
    }

    pub async fn get(&self, id: Uuid) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {id}")))
    }

    /// Lookup by the shopper-facing order number
    pub async fn find_by_number(&self, order_number: &str) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_number(&mut conn, order_number)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {order_number}")))
    }

    /// Newest first, at most `limit` (default 50, capped at 200)
    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE (?1 IS NULL OR status_id = ?1) AND (?2 IS NULL OR user_id = ?2)
             ORDER BY created_at DESC LIMIT ?3"
        );

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(filter.status.map(OrderStatus::id))
            .bind(filter.user_id.as_deref())
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let items = fetch_items(&mut conn, row.id).await?;
            orders.push(row.into_order(items)?);
        }
        Ok(orders)
    }

    /// Move an order to `target`.
    ///
    /// Cancellation is routed through [`cancel`](Self::cancel) so stock and
    /// payment status are handled the same way as an explicit cancel.
    #[tracing::instrument(skip(self))]
    pub async fn transition_status(&self, id: Uuid, target: OrderStatus) -> Result<Order> {
        if target == OrderStatus::Cancelled {
            return self.cancel(id, None).await;
        }

        let mut tx = self.pool.begin().await?;
        let order = fetch(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {id}")))?;

        if !order.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition {
                from: order.status.to_string(),
                to: target.to_string(),
            });
        }

        set_status(&mut tx, id, target).await?;
        let updated = fetch(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {id}")))?;
        tx.commit().await?;

        tracing::info!(
            order_number = %updated.order_number,
            from = %order.status,
            to = %target,
            "Order status updated"
        );
        Ok(updated)
    }

    /// Cancel an order, restoring stock if it had been debited.
    ///
    /// A paid order moves to `refund_pending`; anything else to `cancelled`.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let result = cancel_in(&mut tx, &self.ledger, id, reason).await;

        match result {
            Ok(order) => {
                tx.commit().await?;
                tracing::info!(
                    order_number = %order.order_number,
                    payment_status = %order.payment_status,
                    "Order cancelled"
                );
                Ok(order)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// The status catalog
    pub async fn statuses(&self) -> Result<Vec<StatusCatalogEntry>> {
        let mut conn = self.pool.acquire().await?;
        list_catalog(&mut conn).await
    }
}

async fn cancel_in(
    conn: &mut SqliteConnection,
    ledger: &InventoryLedger,
    id: Uuid,
    reason: Option<String>,
) -> Result<Order> {
    let order = fetch(conn, id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("order {id}")))?;

    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(CoreError::InvalidTransition {
            from: order.status.to_string(),
            to: OrderStatus::Cancelled.to_string(),
        });
    }

    let payment_status = if order.payment_status == PaymentStatus::Paid {
        PaymentStatus::RefundPending
    } else {
        PaymentStatus::Cancelled
    };

    if order.holds_stock() {
        ledger.credit_batch(conn, &order.stock_lines()).await?;
    }

    let now = Utc::now();
    sqlx::query(
        "UPDATE orders SET status_id = ?1, payment_status = ?2, cancellation_reason = ?3,
            cancelled_at = ?4, updated_at = ?4
         WHERE id = ?5",
    )
    .bind(OrderStatus::Cancelled.id())
    .bind(payment_status.as_str())
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    fetch(conn, id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("order {id}")))
}

/// Validate a draft, resolve catalog prices and insert the order with its
/// lines. Runs on the caller's connection.
pub(crate) async fn insert_pending(conn: &mut SqliteConnection, draft: &NewOrder) -> Result<Order> {
    if draft.items.is_empty() {
        return Err(CoreError::Validation("order must contain at least one item".into()));
    }
    if draft.payment_method.trim().is_empty() {
        return Err(CoreError::Validation("payment_method is required".into()));
    }
    if draft.shipping_cost.is_sign_negative() || draft.discount.is_sign_negative() {
        return Err(CoreError::Validation(
            "shipping_cost and discount must not be negative".into(),
        ));
    }

    let mut lines = Vec::with_capacity(draft.items.len());
    let mut subtotal = Decimal::ZERO;
    for item in &draft.items {
        if item.quantity <= 0 {
            return Err(CoreError::Validation(format!(
                "quantity for {} must be positive",
                item.product_id
            )));
        }
        let price = resolve_unit_price(conn, item).await?;
        let line_total = price * Decimal::from(item.quantity);
        subtotal += line_total;
        lines.push((item, price, line_total));
    }

    let totals = OrderTotals::compute(subtotal, draft.shipping_cost, draft.discount);
    draft.declared.verify(&totals)?;
    if totals.total.is_sign_negative() {
        return Err(CoreError::Validation("discount exceeds order total".into()));
    }

    let id = Uuid::new_v4();
    let order_number = draft
        .order_number
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(generate_order_number);
    let now = Utc::now();

    let inserted = sqlx::query(
        "INSERT INTO orders (
            id, order_number, user_id, status_id, payment_status,
            subtotal_cents, tax_cents, shipping_cost_cents, discount_cents, total_cents,
            payment_method, shipping_method, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
    )
    .bind(id)
    .bind(&order_number)
    .bind(draft.user_id.as_deref())
    .bind(OrderStatus::Pending.id())
    .bind(PaymentStatus::Pending.as_str())
    .bind(to_cents(totals.subtotal)?)
    .bind(to_cents(totals.tax)?)
    .bind(to_cents(totals.shipping_cost)?)
    .bind(to_cents(totals.discount)?)
    .bind(to_cents(totals.total)?)
    .bind(draft.payment_method.trim())
    .bind(draft.shipping_method.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await;

    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(CoreError::Duplicate(format!(
                "order number {order_number} already exists"
            )));
        }
        return Err(e.into());
    }

    for (item, price, line_total) in lines {
        sqlx::query(
            "INSERT INTO order_items
                (order_id, product_id, variant_id, quantity, price_cents, total_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id)
        .bind(&item.product_id)
        .bind(item.variant_id.as_deref())
        .bind(item.quantity)
        .bind(to_cents(price)?)
        .bind(to_cents(line_total)?)
        .execute(&mut *conn)
        .await?;
    }

    fetch(conn, id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("order {id}")))
}

/// Catalog unit price for a line; variants may override the product price
async fn resolve_unit_price(conn: &mut SqliteConnection, item: &NewOrderItem) -> Result<Decimal> {
    let cents: Option<i64> = match &item.variant_id {
        Some(variant_id) => {
            let row: Option<(String, i64)> = sqlx::query_as(
                "SELECT v.product_id, COALESCE(v.price_cents, p.price_cents)
                 FROM product_variants v JOIN products p ON p.id = v.product_id
                 WHERE v.id = ?1",
            )
            .bind(variant_id)
            .fetch_optional(&mut *conn)
            .await?;

            match row {
                Some((owner, _)) if owner != item.product_id => {
                    return Err(CoreError::Validation(format!(
                        "variant {variant_id} does not belong to product {}",
                        item.product_id
                    )));
                }
                Some((_, cents)) => Some(cents),
                None => None,
            }
        }
        None => {
            sqlx::query_scalar("SELECT price_cents FROM products WHERE id = ?1")
                .bind(&item.product_id)
                .fetch_optional(&mut *conn)
                .await?
        }
    };

    let price = cents.map(from_cents).ok_or_else(|| {
        CoreError::Validation(format!("unknown product {}", item.sku()))
    })?;

    if let Some(claimed) = item.price {
        if claimed != price {
            return Err(CoreError::Validation(format!(
                "price for {} is {price}, not {claimed}",
                item.sku()
            )));
        }
    }
    Ok(price)
}

/// Load an order with its lines
pub async fn fetch(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
    let row = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => {
            let items = fetch_items(conn, row.id).await?;
            Ok(Some(row.into_order(items)?))
        }
        None => Ok(None),
    }
}

/// Load an order by its human-readable number
pub async fn fetch_by_number(conn: &mut SqliteConnection, order_number: &str) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1");
    let row = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(order_number)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => {
            let items = fetch_items(conn, row.id).await?;
            Ok(Some(row.into_order(items)?))
        }
        None => Ok(None),
    }
}

async fn fetch_items(conn: &mut SqliteConnection, order_id: Uuid) -> Result<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, ItemRow>(
        "SELECT id, order_id, product_id, variant_id, quantity, price_cents, total_cents
         FROM order_items WHERE order_id = ?1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(OrderItem::from).collect())
}

/// Set payment status and order status together (settlement path).
///
/// Stamps `completed_at` / `cancelled_at` when the status calls for it.
pub async fn attach_payment(
    conn: &mut SqliteConnection,
    id: Uuid,
    payment_status: PaymentStatus,
    status: OrderStatus,
) -> Result<()> {
    let affected = sqlx::query("UPDATE orders SET payment_status = ?1 WHERE id = ?2")
        .bind(payment_status.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(CoreError::NotFound(format!("order {id}")));
    }
    set_status(conn, id, status).await
}

async fn set_status(conn: &mut SqliteConnection, id: Uuid, status: OrderStatus) -> Result<()> {
    let affected = sqlx::query(
        "UPDATE orders SET
            status_id = ?1,
            updated_at = ?2,
            completed_at = CASE WHEN ?3 THEN COALESCE(completed_at, ?2) ELSE completed_at END,
            cancelled_at = CASE WHEN ?4 THEN COALESCE(cancelled_at, ?2) ELSE cancelled_at END
         WHERE id = ?5",
    )
    .bind(status.id())
    .bind(Utc::now())
    .bind(status.marks_completion())
    .bind(status == OrderStatus::Cancelled)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(CoreError::NotFound(format!("order {id}")));
    }
    Ok(())
}
