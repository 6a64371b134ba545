//! Order Settlement Coordinator
//!
//! Ties a payment outcome to order and inventory mutation. Client confirms,
//! captures and provider webhooks all end up in [`SettlementCoordinator::settle`],
//! so every entry point converges on the same state.
//!
//! ```text
//!   PaymentEvent ──► StatusTable ──► SettlementOutcome
//!                                        │
//!          ┌──────────── one SQL transaction ─────────────┐
//!          │ idempotency check (gateway_reference)        │
//!          │ locate order (or create it from the event)   │
//!          │ debit / credit InventoryLedger               │
//!          │ reconcile_visibility                         │
//!          │ attach_payment                               │
//!          │ TransactionLog::record                       │
//!          └──────────────────────────────────────────────┘
//! ```
//!
//! The gateway reference is the idempotency key for every provider and every
//! entry point.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{CoreError, Result};
use crate::inventory::InventoryLedger;
use crate::model::{NewOrder, NewOrderItem, NewTransaction, Order, TransactionStatus, transaction_type};
use crate::orders;
use crate::status::{OrderStatus, PaymentStatus, SettlementOutcome, StatusTable};
use crate::transactions;

/// How the event names its order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLocator {
    Id(Uuid),
    /// Orders unknown by number are created from the event's items
    Number(String),
}

impl std::fmt::Display for OrderLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderLocator::Id(id) => write!(f, "{id}"),
            OrderLocator::Number(number) => f.write_str(number),
        }
    }
}

/// Which entry point produced the event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    ClientConfirm,
    Capture,
    Webhook,
}

/// A normalized payment notification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider name, also used as the order's payment method
    pub provider: String,
    pub gateway_reference: String,
    pub order: OrderLocator,
    /// Lines used when the order has to be created at settlement time
    #[serde(default)]
    pub items: Vec<NewOrderItem>,
    /// Amount reported by the provider, in major units
    #[serde(default)]
    pub amount: Option<Decimal>,
    pub provider_status: String,
    pub source: EventSource,
    #[serde(default)]
    pub raw: serde_json::Value,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl PaymentEvent {
    pub fn new(
        provider: impl Into<String>,
        gateway_reference: impl Into<String>,
        order: OrderLocator,
        provider_status: impl Into<String>,
        source: EventSource,
    ) -> Self {
        Self {
            provider: provider.into(),
            gateway_reference: gateway_reference.into(),
            order,
            items: Vec::new(),
            amount: None,
            provider_status: provider_status.into(),
            source,
            raw: serde_json::Value::Null,
            user_id: None,
        }
    }
}

/// What a settlement did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Order, stock and audit log updated
    Applied,
    /// The reference had already been settled; nothing was written
    AlreadySettled,
    /// Approval for an order already paid under another reference
    DuplicatePayment,
    /// Approval arrived after cancellation; money must be returned
    RefundPending,
    /// Recorded in the audit log without changing the order
    AuditOnly,
}

/// Result of [`SettlementCoordinator::settle`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementReport {
    pub order: Order,
    pub outcome: SettlementOutcome,
    pub disposition: Disposition,
    pub transaction_id: i64,
}

/// Applies payment events atomically.
///
/// Clones share one lock: settlements run one at a time, so the reference
/// check always sees every committed settlement before it writes.
#[derive(Clone)]
pub struct SettlementCoordinator {
    pool: DbPool,
    ledger: InventoryLedger,
    serial: Arc<Mutex<()>>,
}

impl SettlementCoordinator {
    pub fn new(pool: DbPool, ledger: InventoryLedger) -> Self {
        Self {
            pool,
            ledger,
            serial: Arc::new(Mutex::new(())),
        }
    }

    /// Settle one payment event.
    ///
    /// Either every write lands or none does. Storage failures surface as
    /// [`CoreError::Settlement`]; domain failures (unknown order, bad input,
    /// insufficient stock) keep their kind.
    #[tracing::instrument(
        skip(self, table, event),
        fields(
            provider = %event.provider,
            reference = %event.gateway_reference,
            order = %event.order,
            status = %event.provider_status,
            source = ?event.source,
        )
    )]
    pub async fn settle(&self, table: &StatusTable, event: &PaymentEvent) -> Result<SettlementReport> {
        if event.gateway_reference.trim().is_empty() {
            return Err(CoreError::Validation("gateway reference is required".into()));
        }
        let outcome = table.resolve(&event.provider_status);

        let _serial = self.serial.lock().await;
        let mut tx = self.pool.begin().await?;
        let result = self.apply(&mut tx, outcome, event).await;

        match result {
            Ok(report) => {
                tx.commit().await.map_err(|e| CoreError::from(e).into_settlement())?;
                tracing::info!(
                    order_number = %report.order.order_number,
                    outcome = ?report.outcome,
                    disposition = ?report.disposition,
                    payment_status = %report.order.payment_status,
                    "Settled payment event"
                );
                Ok(report)
            }
            // Another process settled the same reference first
            Err(CoreError::Duplicate(_)) if outcome == SettlementOutcome::Approved => {
                tx.rollback().await?;
                tracing::info!("Reference settled concurrently, reporting existing result");
                self.existing(outcome, &event.gateway_reference).await
            }
            Err(e) => {
                tx.rollback().await?;
                tracing::error!(error = %e, "Settlement rolled back");
                Err(e.into_settlement())
            }
        }
    }

    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        outcome: SettlementOutcome,
        event: &PaymentEvent,
    ) -> Result<SettlementReport> {
        let reference = event.gateway_reference.as_str();

        let prior = match outcome {
            SettlementOutcome::Approved => transactions::find_settled(conn, reference).await?,
            SettlementOutcome::Refunded => transactions::find_refund(conn, reference).await?,
            _ => None,
        };
        if let Some(prior) = prior {
            let order = orders::fetch(conn, prior.order_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("order {}", prior.order_id)))?;
            tracing::info!(transaction_id = prior.id, "Reference already settled");
            return Ok(SettlementReport {
                order,
                outcome,
                disposition: Disposition::AlreadySettled,
                transaction_id: prior.id,
            });
        }

        let order = self.locate_order(conn, event).await?;

        if outcome == SettlementOutcome::Approved {
            if let Some(amount) = event.amount {
                if amount != order.total {
                    return Err(CoreError::Settlement(format!(
                        "approved amount {amount} does not match order total {}",
                        order.total
                    )));
                }
            }
        }

        let disposition = match outcome {
            SettlementOutcome::Approved => self.approve(conn, &order).await?,
            SettlementOutcome::Refunded => self.refund(conn, &order).await?,
            SettlementOutcome::Pending | SettlementOutcome::Rejected | SettlementOutcome::Cancelled => {
                self.decline(conn, &order, outcome).await?
            }
        };

        let status = match (outcome, disposition) {
            (_, Disposition::DuplicatePayment) => TransactionStatus::Duplicate,
            (SettlementOutcome::Approved, _) => TransactionStatus::Success,
            (SettlementOutcome::Pending, _) => TransactionStatus::Pending,
            (SettlementOutcome::Rejected, _) => TransactionStatus::Failed,
            (SettlementOutcome::Cancelled, _) => TransactionStatus::Cancelled,
            (SettlementOutcome::Refunded, _) => TransactionStatus::Refunded,
        };
        let kind = if outcome == SettlementOutcome::Refunded {
            transaction_type::REFUND
        } else {
            transaction_type::PAYMENT
        };

        let transaction_id = transactions::record(
            conn,
            &NewTransaction {
                order_id: order.id,
                transaction_type: kind.into(),
                payment_method: event.provider.clone(),
                amount: event.amount.unwrap_or(order.total),
                status,
                gateway_reference: Some(reference.to_string()),
                gateway_response: Some(event.raw.clone()),
            },
        )
        .await?;

        let order = orders::fetch(conn, order.id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {}", order.id)))?;

        Ok(SettlementReport {
            order,
            outcome,
            disposition,
            transaction_id,
        })
    }

    async fn locate_order(&self, conn: &mut SqliteConnection, event: &PaymentEvent) -> Result<Order> {
        match &event.order {
            OrderLocator::Id(id) => orders::fetch(conn, *id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("order {id}"))),
            OrderLocator::Number(number) => {
                if let Some(order) = orders::fetch_by_number(conn, number).await? {
                    return Ok(order);
                }
                if event.items.is_empty() {
                    return Err(CoreError::NotFound(format!("order {number}")));
                }

                let mut draft = NewOrder::new(event.provider.clone(), event.items.clone());
                draft.order_number = Some(number.clone());
                draft.user_id = event.user_id.clone();
                let order = orders::insert_pending(conn, &draft).await?;
                tracing::info!(order_number = %number, "Created order at settlement time");
                Ok(order)
            }
        }
    }

    async fn approve(&self, conn: &mut SqliteConnection, order: &Order) -> Result<Disposition> {
        if order.payment_status == PaymentStatus::Paid {
            tracing::warn!(
                order_number = %order.order_number,
                "Order already paid under another reference"
            );
            return Ok(Disposition::DuplicatePayment);
        }

        if order.status == OrderStatus::Cancelled {
            tracing::warn!(
                order_number = %order.order_number,
                "Approval for a cancelled order, refund required"
            );
            orders::attach_payment(conn, order.id, PaymentStatus::RefundPending, OrderStatus::Cancelled)
                .await?;
            return Ok(Disposition::RefundPending);
        }

        self.ledger.debit_batch(conn, &order.stock_lines()).await?;
        self.ledger.reconcile_visibility(conn).await?;

        let (payment_status, order_status) = SettlementOutcome::Approved.effect();
        // Orders an admin already moved along keep their status
        let order_status = if order.status == OrderStatus::Pending {
            order_status
        } else {
            order.status
        };
        orders::attach_payment(conn, order.id, payment_status, order_status).await?;
        Ok(Disposition::Applied)
    }

    async fn refund(&self, conn: &mut SqliteConnection, order: &Order) -> Result<Disposition> {
        match order.payment_status {
            PaymentStatus::Paid => {
                self.ledger.credit_batch(conn, &order.stock_lines()).await?;
            }
            PaymentStatus::RefundPending => {}
            _ => {
                tracing::warn!(
                    order_number = %order.order_number,
                    payment_status = %order.payment_status,
                    "Refund for an order that was never paid"
                );
                return Ok(Disposition::AuditOnly);
            }
        }

        let (payment_status, order_status) = SettlementOutcome::Refunded.effect();
        orders::attach_payment(conn, order.id, payment_status, order_status).await?;
        Ok(Disposition::Applied)
    }

    async fn decline(
        &self,
        conn: &mut SqliteConnection,
        order: &Order,
        outcome: SettlementOutcome,
    ) -> Result<Disposition> {
        if order.payment_status != PaymentStatus::Pending || order.status == OrderStatus::Cancelled {
            tracing::info!(
                order_number = %order.order_number,
                payment_status = %order.payment_status,
                outcome = ?outcome,
                "Event does not change a settled order"
            );
            return Ok(Disposition::AuditOnly);
        }

        let (payment_status, order_status) = outcome.effect();
        orders::attach_payment(conn, order.id, payment_status, order_status).await?;
        Ok(Disposition::Applied)
    }

    async fn existing(&self, outcome: SettlementOutcome, reference: &str) -> Result<SettlementReport> {
        let mut conn = self.pool.acquire().await?;
        let prior = transactions::find_settled(&mut conn, reference)
            .await?
            .ok_or_else(|| CoreError::Settlement(format!("reference {reference} vanished")))?;
        let order = orders::fetch(&mut conn, prior.order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("order {}", prior.order_id)))?;
        Ok(SettlementReport {
            order,
            outcome,
            disposition: Disposition::AlreadySettled,
            transaction_id: prior.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeclaredTotals, SkuRef};
    use crate::orders::OrderStore;
    use crate::test_utils::{setup_catalog, setup_catalog_file};
    use crate::transactions::TransactionLog;
    use rust_decimal_macros::dec;

    fn table() -> StatusTable {
        StatusTable::new(
            "test",
            &[
                ("approved", SettlementOutcome::Approved),
                ("pending", SettlementOutcome::Pending),
                ("rejected", SettlementOutcome::Rejected),
                ("cancelled", SettlementOutcome::Cancelled),
                ("refunded", SettlementOutcome::Refunded),
            ],
            SettlementOutcome::Pending,
        )
        .unwrap()
    }

    struct Harness {
        pool: DbPool,
        store: OrderStore,
        coordinator: SettlementCoordinator,
        log: TransactionLog,
        ledger: InventoryLedger,
    }

    async fn harness_with(ledger: InventoryLedger) -> Harness {
        let pool = setup_catalog().await;
        Harness {
            store: OrderStore::new(pool.clone(), ledger),
            coordinator: SettlementCoordinator::new(pool.clone(), ledger),
            log: TransactionLog::new(pool.clone()),
            ledger,
            pool,
        }
    }

    async fn harness() -> Harness {
        harness_with(InventoryLedger::default()).await
    }

    impl Harness {
        async fn stock(&self, id: &str) -> i64 {
            self.ledger
                .stock(&self.pool, &SkuRef::product(id))
                .await
                .unwrap()
                .stock_quantity
        }

        async fn order(&self, items: Vec<NewOrderItem>) -> Order {
            self.store
                .create_pending_order(NewOrder::new("mercadopago", items))
                .await
                .unwrap()
        }
    }

    fn event(order: &Order, reference: &str, status: &str) -> PaymentEvent {
        let mut event = PaymentEvent::new(
            "mercadopago",
            reference,
            OrderLocator::Id(order.id),
            status,
            EventSource::Webhook,
        );
        event.amount = Some(order.total);
        event
    }

    #[tokio::test]
    async fn test_create_then_approve() {
        let h = harness().await;

        let mut item = NewOrderItem::new("P1", 2);
        item.price = Some(dec!(100));
        let mut draft = NewOrder::new("mercadopago", vec![item]);
        draft.declared = DeclaredTotals {
            subtotal: Some(dec!(200)),
            tax: Some(dec!(32)),
            total: Some(dec!(232)),
        };
        let order = h.store.create_pending_order(draft).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);

        let report = h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        assert_eq!(report.disposition, Disposition::Applied);
        assert_eq!(report.order.payment_status, PaymentStatus::Paid);
        assert_eq!(report.order.status, OrderStatus::Processing);
        assert_eq!(h.stock("P1").await, 8);

        let rows = h.log.for_order(order.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Success);
        assert_eq!(rows[0].amount, dec!(232));
    }

    #[tokio::test]
    async fn test_same_reference_settles_once() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;
        let approved = event(&order, "pay-1", "approved");

        h.coordinator.settle(&table(), &approved).await.unwrap();
        assert_eq!(h.stock("P1").await, 8);

        // Webhook redelivery and the client confirm both replay the event
        let mut confirm = approved.clone();
        confirm.source = EventSource::ClientConfirm;
        for replay in [&approved, &confirm] {
            let report = h.coordinator.settle(&table(), replay).await.unwrap();
            assert_eq!(report.disposition, Disposition::AlreadySettled);
            assert_eq!(report.order.payment_status, PaymentStatus::Paid);
        }

        assert_eq!(h.stock("P1").await, 8);
        assert_eq!(h.log.for_order(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_settlements_of_one_reference() {
        let (pool, path) = setup_catalog_file().await;
        let ledger = InventoryLedger::default();
        let store = OrderStore::new(pool.clone(), ledger);
        let order = store
            .create_pending_order(NewOrder::new("mercadopago", vec![NewOrderItem::new("P1", 2)]))
            .await
            .unwrap();

        // Client confirm and webhook arrive together on separate connections
        let coordinator = SettlementCoordinator::new(pool.clone(), ledger);
        let webhook = event(&order, "pay-1", "approved");
        let mut confirm = webhook.clone();
        confirm.source = EventSource::ClientConfirm;
        let other = coordinator.clone();
        let table = table();
        let (first, second) = tokio::join!(
            coordinator.settle(&table, &webhook),
            other.settle(&table, &confirm)
        );

        let mut dispositions = vec![first.unwrap().disposition, second.unwrap().disposition];
        dispositions.sort_by_key(|d| *d == Disposition::AlreadySettled);
        assert_eq!(dispositions, vec![Disposition::Applied, Disposition::AlreadySettled]);

        let level = ledger.stock(&pool, &SkuRef::product("P1")).await.unwrap();
        assert_eq!(level.stock_quantity, 8);
        let rows = TransactionLog::new(pool.clone()).for_order(order.id).await.unwrap();
        assert_eq!(rows.len(), 1);

        pool.close().await;
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_existing_reports_the_first_settlement() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;
        let applied = h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        let report = h
            .coordinator
            .existing(SettlementOutcome::Approved, "pay-1")
            .await
            .unwrap();

        assert_eq!(report.disposition, Disposition::AlreadySettled);
        assert_eq!(report.transaction_id, applied.transaction_id);
        assert_eq!(report.order.id, order.id);

        let err = h
            .coordinator
            .existing(SettlementOutcome::Approved, "pay-unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Settlement(_)));
    }

    #[tokio::test]
    async fn test_second_reference_for_paid_order_is_audited() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;

        h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();
        let report = h.coordinator.settle(&table(), &event(&order, "pay-2", "approved")).await.unwrap();

        assert_eq!(report.disposition, Disposition::DuplicatePayment);
        assert_eq!(h.stock("P1").await, 8);
        let rows = h.log.for_order(order.id).await.unwrap();
        assert_eq!(rows[1].status, TransactionStatus::Duplicate);
    }

    #[tokio::test]
    async fn test_cancel_paid_order_restores_stock() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;
        h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();
        assert_eq!(h.stock("P1").await, 8);

        let cancelled = h.store.cancel(order.id, Some("customer request".into())).await.unwrap();

        assert_eq!(cancelled.payment_status, PaymentStatus::RefundPending);
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.stock("P1").await, 10);
    }

    #[tokio::test]
    async fn test_rejected_for_unknown_order_number() {
        let h = harness().await;
        let mut event = PaymentEvent::new(
            "mercadopago",
            "pay-9",
            OrderLocator::Number("FT-NEW-1".into()),
            "rejected",
            EventSource::Webhook,
        );
        event.items = vec![NewOrderItem::new("P1", 1)];

        let report = h.coordinator.settle(&table(), &event).await.unwrap();

        assert_eq!(report.order.order_number, "FT-NEW-1");
        assert_eq!(report.order.status, OrderStatus::Cancelled);
        assert_eq!(report.order.payment_status, PaymentStatus::Rejected);
        assert!(report.order.cancelled_at.is_some());
        assert_eq!(h.stock("P1").await, 10);

        let rows = h.log.for_order(report.order.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_number_without_items_is_not_found() {
        let h = harness().await;
        let event = PaymentEvent::new(
            "stripe",
            "pi_1",
            OrderLocator::Number("FT-MISSING".into()),
            "approved",
            EventSource::Webhook,
        );
        let err = h.coordinator.settle(&table(), &event).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_debit_rolls_back_everything() {
        let h = harness().await;
        let order = h
            .order(vec![
                NewOrderItem::new("P1", 1),
                NewOrderItem::new("P3", 1),
                NewOrderItem::new("P2", 1),
            ])
            .await;

        // Item 2 of 3 no longer resolves to a SKU
        sqlx::query("DELETE FROM products WHERE id = 'P3'")
            .execute(&h.pool)
            .await
            .unwrap();

        let err = h
            .coordinator
            .settle(&table(), &event(&order, "pay-1", "approved"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        assert_eq!(h.stock("P1").await, 10);
        assert_eq!(h.stock("P2").await, 3);
        let order = h.store.get(order.id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(h.log.for_order(order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_without_oversell() {
        let h = harness_with(InventoryLedger::new(false)).await;
        let order = h
            .order(vec![NewOrderItem::new("P1", 2), NewOrderItem::new("P2", 5)])
            .await;

        let err = h
            .coordinator
            .settle(&table(), &event(&order, "pay-1", "approved"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { .. }));
        assert_eq!(h.stock("P1").await, 10);
        assert_eq!(h.stock("P2").await, 3);
    }

    #[tokio::test]
    async fn test_oversell_hides_sku() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P2", 5)]).await;

        h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        let level = h.ledger.stock(&h.pool, &SkuRef::product("P2")).await.unwrap();
        assert_eq!(level.stock_quantity, -2);
        assert!(!level.is_active);
    }

    #[tokio::test]
    async fn test_amount_mismatch_fails() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;
        let mut approved = event(&order, "pay-1", "approved");
        approved.amount = Some(dec!(1.00));

        let err = h.coordinator.settle(&table(), &approved).await.unwrap_err();
        assert!(matches!(err, CoreError::Settlement(_)));
        assert_eq!(h.stock("P1").await, 10);
    }

    #[tokio::test]
    async fn test_rejection_does_not_downgrade_paid_order() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;
        h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        let report = h.coordinator.settle(&table(), &event(&order, "pay-1", "rejected")).await.unwrap();

        assert_eq!(report.disposition, Disposition::AuditOnly);
        assert_eq!(report.order.payment_status, PaymentStatus::Paid);
        assert_eq!(report.order.status, OrderStatus::Processing);
        assert_eq!(h.stock("P1").await, 8);
    }

    #[tokio::test]
    async fn test_discount_larger_than_tax_settles_at_total() {
        let h = harness().await;
        let mut draft = NewOrder::new("mercadopago", vec![NewOrderItem::new("P1", 1)]);
        draft.discount = dec!(20);
        let order = h.store.create_pending_order(draft).await.unwrap();
        assert_eq!(order.total, dec!(96));

        let report = h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        assert_eq!(report.disposition, Disposition::Applied);
        assert_eq!(report.order.payment_status, PaymentStatus::Paid);
        assert_eq!(h.stock("P1").await, 9);
        let rows = h.log.for_order(order.id).await.unwrap();
        assert_eq!(rows[0].amount, dec!(96));
    }

    #[tokio::test]
    async fn test_pending_keeps_order_pending() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;

        let report = h.coordinator.settle(&table(), &event(&order, "pay-1", "in_process")).await.unwrap();

        assert_eq!(report.outcome, SettlementOutcome::Pending);
        assert_eq!(report.order.status, OrderStatus::Pending);
        assert_eq!(report.order.payment_status, PaymentStatus::Pending);
        assert_eq!(h.stock("P1").await, 10);
    }

    #[tokio::test]
    async fn test_refund_restores_stock_once() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;
        h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        let refunded = event(&order, "pay-1", "refunded");
        let report = h.coordinator.settle(&table(), &refunded).await.unwrap();
        assert_eq!(report.disposition, Disposition::Applied);
        assert_eq!(report.order.payment_status, PaymentStatus::Refunded);
        assert_eq!(report.order.status, OrderStatus::Cancelled);
        assert_eq!(h.stock("P1").await, 10);

        let again = h.coordinator.settle(&table(), &refunded).await.unwrap();
        assert_eq!(again.disposition, Disposition::AlreadySettled);
        assert_eq!(h.stock("P1").await, 10);
    }

    #[tokio::test]
    async fn test_approval_after_cancel_needs_refund() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 2)]).await;
        h.store.cancel(order.id, None).await.unwrap();

        let report = h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        assert_eq!(report.disposition, Disposition::RefundPending);
        assert_eq!(report.order.payment_status, PaymentStatus::RefundPending);
        assert_eq!(report.order.status, OrderStatus::Cancelled);
        assert_eq!(h.stock("P1").await, 10);
    }

    #[tokio::test]
    async fn test_settled_amounts_match_total() {
        let h = harness().await;
        let order = h.order(vec![NewOrderItem::new("P1", 1), NewOrderItem::new("P3", 2)]).await;
        h.coordinator.settle(&table(), &event(&order, "pay-1", "pending")).await.unwrap();
        h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();
        h.coordinator.settle(&table(), &event(&order, "pay-1", "approved")).await.unwrap();

        let settled: Decimal = h
            .log
            .for_order(order.id)
            .await
            .unwrap()
            .iter()
            .filter(|t| t.status == TransactionStatus::Success)
            .map(|t| t.amount)
            .sum();
        assert_eq!(settled, order.total);
    }
}
