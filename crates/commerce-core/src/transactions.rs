//! Transaction Log
//!
//! Append-only audit of payment attempts. Rows are never updated or deleted.
//! A partial unique index on `gateway_reference` (successful payments only)
//! backs the settlement idempotency check.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{CoreError, Result, is_foreign_key_violation, is_unique_violation};
use crate::model::{
    NewTransaction, Transaction, TransactionStatus, from_cents, to_cents, transaction_type,
};

const TRANSACTION_COLUMNS: &str = "id, order_id, transaction_type, payment_method, amount_cents, \
     status, gateway_reference, gateway_response, created_at";

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    order_id: Uuid,
    transaction_type: String,
    payment_method: String,
    amount_cents: i64,
    status: String,
    gateway_reference: Option<String>,
    gateway_response: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = CoreError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        let gateway_response = row
            .gateway_response
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Transaction {
            id: row.id,
            order_id: row.order_id,
            transaction_type: row.transaction_type,
            payment_method: row.payment_method,
            amount: from_cents(row.amount_cents),
            status: TransactionStatus::parse(&row.status),
            gateway_reference: row.gateway_reference,
            gateway_response,
            created_at: row.created_at,
        })
    }
}

/// Payment audit log
#[derive(Clone)]
pub struct TransactionLog {
    pool: DbPool,
}

impl TransactionLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record an attempt in its own transaction
    pub async fn record(&self, entry: &NewTransaction) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = record(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// All attempts for an order, oldest first
    pub async fn for_order(&self, order_id: Uuid) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE order_id = ?1 ORDER BY id"
        );
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }
}

/// Append one row on the caller's connection.
///
/// A second successful payment with the same gateway reference is rejected
/// with [`CoreError::Duplicate`]; an unknown order with
/// [`CoreError::NotFound`].
pub async fn record(conn: &mut SqliteConnection, entry: &NewTransaction) -> Result<i64> {
    if entry.payment_method.trim().is_empty() {
        return Err(CoreError::Validation("payment_method is required".into()));
    }
    if entry.amount.is_sign_negative() {
        return Err(CoreError::Validation("amount must not be negative".into()));
    }

    let response = entry
        .gateway_response
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        "INSERT INTO transactions (
            order_id, transaction_type, payment_method, amount_cents, status,
            gateway_reference, gateway_response, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(entry.order_id)
    .bind(&entry.transaction_type)
    .bind(entry.payment_method.trim())
    .bind(to_cents(entry.amount)?)
    .bind(entry.status.as_str())
    .bind(entry.gateway_reference.as_deref())
    .bind(response)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await;

    match result {
        Ok(done) => {
            let id = done.last_insert_rowid();
            tracing::debug!(
                id,
                order_id = %entry.order_id,
                status = %entry.status,
                reference = ?entry.gateway_reference,
                "Recorded transaction"
            );
            Ok(id)
        }
        Err(e) if is_unique_violation(&e) => Err(CoreError::Duplicate(format!(
            "payment {} already settled",
            entry.gateway_reference.as_deref().unwrap_or("<none>")
        ))),
        Err(e) if is_foreign_key_violation(&e) => {
            Err(CoreError::NotFound(format!("order {}", entry.order_id)))
        }
        Err(e) => Err(e.into()),
    }
}

/// The successful payment row for a gateway reference, if any
pub async fn find_settled(conn: &mut SqliteConnection, reference: &str) -> Result<Option<Transaction>> {
    find_recorded(conn, reference, transaction_type::PAYMENT, &TransactionStatus::Success).await
}

/// The refund row for a gateway reference, if any
pub async fn find_refund(conn: &mut SqliteConnection, reference: &str) -> Result<Option<Transaction>> {
    find_recorded(conn, reference, transaction_type::REFUND, &TransactionStatus::Refunded).await
}

async fn find_recorded(
    conn: &mut SqliteConnection,
    reference: &str,
    kind: &str,
    status: &TransactionStatus,
) -> Result<Option<Transaction>> {
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
         WHERE gateway_reference = ?1 AND transaction_type = ?2 AND status = ?3
         ORDER BY id LIMIT 1"
    );
    let row = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(reference)
        .bind(kind)
        .bind(status.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Transaction::try_from).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryLedger;
    use crate::model::{NewOrder, NewOrderItem};
    use crate::orders::OrderStore;
    use crate::test_utils::setup_catalog;
    use rust_decimal_macros::dec;

    fn payment(order_id: Uuid, status: TransactionStatus, reference: &str) -> NewTransaction {
        NewTransaction {
            order_id,
            transaction_type: transaction_type::PAYMENT.into(),
            payment_method: "stripe".into(),
            amount: dec!(232),
            status,
            gateway_reference: Some(reference.into()),
            gateway_response: Some(serde_json::json!({ "id": reference })),
        }
    }

    async fn order_id(pool: &DbPool) -> Uuid {
        OrderStore::new(pool.clone(), InventoryLedger::default())
            .create_pending_order(NewOrder::new("stripe", vec![NewOrderItem::new("P1", 2)]))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let pool = setup_catalog().await;
        let log = TransactionLog::new(pool.clone());
        let order_id = order_id(&pool).await;

        log.record(&payment(order_id, TransactionStatus::Pending, "pi_1")).await.unwrap();
        log.record(&payment(order_id, TransactionStatus::Success, "pi_1")).await.unwrap();

        let rows = log.for_order(order_id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, TransactionStatus::Success);
        assert_eq!(rows[1].amount, dec!(232));
        assert_eq!(rows[1].gateway_response.as_ref().unwrap()["id"], "pi_1");
    }

    #[tokio::test]
    async fn test_second_success_for_reference_is_duplicate() {
        let pool = setup_catalog().await;
        let log = TransactionLog::new(pool.clone());
        let order_id = order_id(&pool).await;

        log.record(&payment(order_id, TransactionStatus::Success, "pi_1")).await.unwrap();
        let err = log
            .record(&payment(order_id, TransactionStatus::Success, "pi_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Duplicate(_)));

        // Non-success rows with the same reference are fine
        log.record(&payment(order_id, TransactionStatus::Failed, "pi_1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let pool = setup_catalog().await;
        let log = TransactionLog::new(pool.clone());

        let err = log
            .record(&payment(Uuid::new_v4(), TransactionStatus::Pending, "pi_x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_settled() {
        let pool = setup_catalog().await;
        let log = TransactionLog::new(pool.clone());
        let order_id = order_id(&pool).await;

        log.record(&payment(order_id, TransactionStatus::Pending, "pi_2")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert!(find_settled(&mut conn, "pi_2").await.unwrap().is_none());
        drop(conn);

        log.record(&payment(order_id, TransactionStatus::Success, "pi_2")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let settled = find_settled(&mut conn, "pi_2").await.unwrap().unwrap();
        assert_eq!(settled.order_id, order_id);
    }
}
