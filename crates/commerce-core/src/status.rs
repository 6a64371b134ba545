//! Order and Payment Status
//!
//! The order-status catalog is a fixed enumeration seeded once at startup.
//! Lookups are total functions over the enum and never insert rows.
//!
//! Provider status strings reach the settlement coordinator through a
//! [`StatusTable`], which maps every raw value to exactly one
//! [`SettlementOutcome`] (with an explicit default for unknown values).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::{CoreError, Result};

/// Order status catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Every status, in catalog order
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Catalog row id
    pub fn id(self) -> i64 {
        match self {
            OrderStatus::Pending => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Shipped => 3,
            OrderStatus::Delivered => 4,
            OrderStatus::Completed => 5,
            OrderStatus::Cancelled => 6,
        }
    }

    /// Catalog display name
    pub fn catalog_name(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pendiente",
            OrderStatus::Processing => "Procesando",
            OrderStatus::Shipped => "Enviado",
            OrderStatus::Delivered => "Entregado",
            OrderStatus::Completed => "Completado",
            OrderStatus::Cancelled => "Cancelado",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            OrderStatus::Pending => "#f59e0b",
            OrderStatus::Processing => "#3b82f6",
            OrderStatus::Shipped => "#8b5cf6",
            OrderStatus::Delivered => "#10b981",
            OrderStatus::Completed => "#059669",
            OrderStatus::Cancelled => "#ef4444",
        }
    }

    pub fn sort_order(self) -> i64 {
        self.id() * 10
    }

    /// Lowercased display name used by listing endpoints
    pub fn display_name(self) -> String {
        self.catalog_name().to_lowercase()
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Case-insensitive lookup accepting catalog (Spanish) or English names
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| {
            s.catalog_name().to_lowercase() == name || s.english_name() == name
        })
    }

    fn english_name(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Entering this status stamps `completed_at`
    pub fn marks_completion(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Delivered)
    }

    /// No transitions leave this status
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }

    /// Completed orders can still be cancelled (returns); cancelled ones are final
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            OrderStatus::Completed => target == OrderStatus::Cancelled,
            _ => true,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.catalog_name())
    }
}

/// Payment status of an order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Rejected,
    RefundPending,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::RefundPending => "refund_pending",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a stored or client-supplied value (Spanish aliases accepted)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "pendiente" => Some(PaymentStatus::Pending),
            "paid" | "aprobado" | "approved" => Some(PaymentStatus::Paid),
            "rejected" | "rechazado" => Some(PaymentStatus::Rejected),
            "refund_pending" => Some(PaymentStatus::RefundPending),
            "refunded" | "reembolsado" => Some(PaymentStatus::Refunded),
            "cancelled" | "cancelado" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog row as exposed to admin clients
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusCatalogEntry {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub sort_order: i64,
    pub is_active: bool,
}

/// Seed the fixed catalog. Safe to run on every startup.
pub async fn seed_catalog(conn: &mut SqliteConnection) -> Result<()> {
    for status in OrderStatus::ALL {
        sqlx::query(
            "INSERT INTO order_statuses (id, name, color, sort_order, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                color = excluded.color,
                sort_order = excluded.sort_order",
        )
        .bind(status.id())
        .bind(status.catalog_name())
        .bind(status.color())
        .bind(status.sort_order())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// List the catalog in display order
pub async fn list_catalog(conn: &mut SqliteConnection) -> Result<Vec<StatusCatalogEntry>> {
    let rows = sqlx::query_as::<_, StatusCatalogEntry>(
        "SELECT id, name, color, sort_order, is_active FROM order_statuses ORDER BY sort_order",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

// ============================================================================
// Provider status mapping
// ============================================================================

/// Normalized result of a payment attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Approved,
    Pending,
    Rejected,
    Cancelled,
    Refunded,
}

impl SettlementOutcome {
    /// The `(payment_status, order_status)` pair this outcome settles to
    pub fn effect(self) -> (PaymentStatus, OrderStatus) {
        match self {
            SettlementOutcome::Approved => (PaymentStatus::Paid, OrderStatus::Processing),
            SettlementOutcome::Pending => (PaymentStatus::Pending, OrderStatus::Pending),
            SettlementOutcome::Rejected => (PaymentStatus::Rejected, OrderStatus::Cancelled),
            SettlementOutcome::Cancelled => (PaymentStatus::Cancelled, OrderStatus::Cancelled),
            SettlementOutcome::Refunded => (PaymentStatus::Refunded, OrderStatus::Cancelled),
        }
    }
}

/// Total mapping from a provider's raw status values to outcomes
#[derive(Clone, Debug)]
pub struct StatusTable {
    provider: String,
    entries: HashMap<String, SettlementOutcome>,
    default: SettlementOutcome,
}

impl StatusTable {
    /// Build and validate a table.
    ///
    /// Fails when the table is empty, when two keys collide after
    /// normalisation, or when no value maps to `Approved`.
    pub fn new(
        provider: impl Into<String>,
        entries: &[(&str, SettlementOutcome)],
        default: SettlementOutcome,
    ) -> Result<Self> {
        let provider = provider.into();
        if entries.is_empty() {
            return Err(CoreError::Config(format!("{provider}: empty status table")));
        }

        let mut map = HashMap::with_capacity(entries.len());
        for (raw, outcome) in entries {
            let key = normalize(raw);
            if map.insert(key.clone(), *outcome).is_some() {
                return Err(CoreError::Config(format!(
                    "{provider}: duplicate status '{key}'"
                )));
            }
        }

        if !map.values().any(|o| *o == SettlementOutcome::Approved) {
            return Err(CoreError::Config(format!(
                "{provider}: no status maps to approved"
            )));
        }

        Ok(Self {
            provider,
            entries: map,
            default,
        })
    }

    /// Resolve a raw provider status; unknown values get the default
    pub fn resolve(&self, raw: &str) -> SettlementOutcome {
        let key = normalize(raw);
        match self.entries.get(&key) {
            Some(outcome) => *outcome,
            None => {
                tracing::warn!(
                    provider = %self.provider,
                    status = %raw,
                    default = ?self.default,
                    "Unknown provider status, using default"
                );
                self.default
            }
        }
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}
