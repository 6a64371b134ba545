//! Domain Models
//!
//! Orders, order lines, SKU references and payment audit records.
//! Uses `rust_decimal` for all monetary values and stores them as integer
//! minor units (cents) in the database.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::status::{OrderStatus, PaymentStatus};

/// Tax rate applied to every order subtotal
pub const TAX_RATE: Decimal = dec!(0.16);

/// Prefix of generated order numbers
pub const ORDER_NUMBER_PREFIX: &str = "FT";

/// Convert a decimal amount to integer cents.
///
/// Rejects amounts with more than two fractional digits instead of rounding.
pub fn to_cents(amount: Decimal) -> Result<i64> {
    let cents = amount * Decimal::ONE_HUNDRED;
    if !cents.fract().is_zero() {
        return Err(CoreError::Validation(format!(
            "amount {amount} has more than two decimal places"
        )));
    }
    cents
        .trunc()
        .to_i64()
        .ok_or_else(|| CoreError::Validation(format!("amount {amount} is out of range")))
}

/// Convert integer cents back to a decimal amount
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Generate a human-readable order number (`FT-<millis>-<suffix>`)
pub fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
    format!(
        "{}-{}-{}",
        ORDER_NUMBER_PREFIX,
        Utc::now().timestamp_millis(),
        &suffix[..4]
    )
}

/// Reference to an inventory-trackable unit.
///
/// The variant wins when both ids are present; a bare variant id is resolved
/// to its owning product by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkuRef {
    #[serde(default)]
    pub product_id: Option<String>,

    #[serde(default)]
    pub variant_id: Option<String>,
}

impl SkuRef {
    pub fn product(product_id: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id.into()),
            variant_id: None,
        }
    }

    pub fn variant(product_id: impl Into<String>, variant_id: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id.into()),
            variant_id: Some(variant_id.into()),
        }
    }
}

impl std::fmt::Display for SkuRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.product_id, &self.variant_id) {
            (Some(p), Some(v)) => write!(f, "{p}/{v}"),
            (None, Some(v)) => write!(f, "variant {v}"),
            (Some(p), None) => write!(f, "{p}"),
            (None, None) => write!(f, "<empty sku>"),
        }
    }
}

/// A quantity of one SKU, the unit of a ledger batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StockLine {
    #[serde(flatten)]
    pub sku: SkuRef,
    pub quantity: i64,
}

/// Monetary breakdown of an order, fixed at creation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// Compute totals from a subtotal; tax is a fixed 16% rounded to cents
    pub fn compute(subtotal: Decimal, shipping_cost: Decimal, discount: Decimal) -> Self {
        let tax = (subtotal * TAX_RATE).round_dp(2);
        Self {
            subtotal,
            tax,
            shipping_cost,
            discount,
            total: subtotal + tax + shipping_cost - discount,
        }
    }

    /// Check the creation invariant `total == subtotal + tax + shipping - discount`
    pub fn is_balanced(&self) -> bool {
        self.total == self.subtotal + self.tax + self.shipping_cost - self.discount
    }
}

/// Amounts a client claims for an order; checked against computed totals
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct DeclaredTotals {
    #[serde(default)]
    pub subtotal: Option<Decimal>,
    #[serde(default)]
    pub tax: Option<Decimal>,
    #[serde(default)]
    pub total: Option<Decimal>,
}

impl DeclaredTotals {
    /// Reject any declared amount that disagrees with the computed totals
    pub fn verify(&self, computed: &OrderTotals) -> Result<()> {
        let checks = [
            ("subtotal", self.subtotal, computed.subtotal),
            ("tax", self.tax, computed.tax),
            ("total", self.total, computed.total),
        ];
        for (field, declared, expected) in checks {
            if let Some(declared) = declared {
                if declared != expected {
                    return Err(CoreError::Validation(format!(
                        "{field} {declared} does not match computed {expected}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A line of a new order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: String,

    #[serde(default)]
    pub variant_id: Option<String>,

    pub quantity: i64,

    /// Unit price the client saw; must match the catalog price if given
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl NewOrderItem {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id: None,
            quantity,
            price: None,
        }
    }

    pub fn sku(&self) -> SkuRef {
        SkuRef {
            product_id: Some(self.product_id.clone()),
            variant_id: self.variant_id.clone(),
        }
    }
}

/// Everything needed to create a pending order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub order_number: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    pub items: Vec<NewOrderItem>,

    #[serde(default)]
    pub shipping_cost: Decimal,

    #[serde(default)]
    pub discount: Decimal,

    #[serde(flatten)]
    pub declared: DeclaredTotals,

    pub payment_method: String,

    #[serde(default)]
    pub shipping_method: Option<String>,
}

impl NewOrder {
    pub fn new(payment_method: impl Into<String>, items: Vec<NewOrderItem>) -> Self {
        Self {
            order_number: None,
            user_id: None,
            items,
            shipping_cost: Decimal::ZERO,
            discount: Decimal::ZERO,
            declared: DeclaredTotals::default(),
            payment_method: payment_method.into(),
            shipping_method: None,
        }
    }
}

/// An order line as persisted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: Uuid,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,

    /// Unit price snapshot at order time
    pub price: Decimal,

    /// `price * quantity`
    pub total: Decimal,
}

impl OrderItem {
    pub fn sku(&self) -> SkuRef {
        SkuRef {
            product_id: Some(self.product_id.clone()),
            variant_id: self.variant_id.clone(),
        }
    }
}

/// An order with its lines
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub payment_method: String,
    pub shipping_method: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn totals(&self) -> OrderTotals {
        OrderTotals {
            subtotal: self.subtotal,
            tax: self.tax,
            shipping_cost: self.shipping_cost,
            discount: self.discount,
            total: self.total,
        }
    }

    /// Stock for this order has been debited and not yet restored
    pub fn holds_stock(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.items
            .iter()
            .map(|item| StockLine {
                sku: item.sku(),
                quantity: item.quantity,
            })
            .collect()
    }
}

/// Normalized status of an audit row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TransactionStatus {
    Success,
    Pending,
    Failed,
    Cancelled,
    Refunded,
    /// Approved payment for an order that was already paid
    Duplicate,
    /// Provider-specific value kept verbatim
    Other(String),
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Duplicate => "duplicate",
            TransactionStatus::Other(s) => s,
        }
    }

    /// Parse a status, folding the usual success spellings together
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "success" | "succeeded" | "completed" | "approved" | "paid" => {
                TransactionStatus::Success
            }
            "pending" => TransactionStatus::Pending,
            "failed" | "rejected" | "declined" => TransactionStatus::Failed,
            "cancelled" | "canceled" => TransactionStatus::Cancelled,
            "refunded" => TransactionStatus::Refunded,
            "duplicate" => TransactionStatus::Duplicate,
            other => TransactionStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for TransactionStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<TransactionStatus> for String {
    fn from(status: TransactionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment transaction types
pub mod transaction_type {
    pub const PAYMENT: &str = "payment";
    pub const REFUND: &str = "refund";
}

/// Append-only payment audit record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub order_id: Uuid,
    pub transaction_type: String,
    pub payment_method: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Input for a new audit record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTransaction {
    pub order_id: Uuid,
    pub transaction_type: String,
    pub payment_method: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    #[serde(default)]
    pub gateway_reference: Option<String>,
    #[serde(default)]
    pub gateway_response: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(dec!(232)).unwrap(), 23200);
        assert_eq!(to_cents(dec!(0.5)).unwrap(), 50);
        assert_eq!(from_cents(23200), dec!(232.00));
        assert!(to_cents(dec!(1.005)).is_err());
    }

    #[test]
    fn test_totals_compute() {
        let totals = OrderTotals::compute(dec!(200), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(totals.tax, dec!(32));
        assert_eq!(totals.total, dec!(232));
        assert!(totals.is_balanced());

        let with_extras = OrderTotals::compute(dec!(99.99), dec!(50), dec!(10));
        assert_eq!(with_extras.tax, dec!(16.00));
        assert_eq!(with_extras.total, dec!(155.99));
        assert!(with_extras.is_balanced());
    }

    #[test]
    fn test_declared_totals_mismatch() {
        let computed = OrderTotals::compute(dec!(200), Decimal::ZERO, Decimal::ZERO);
        let ok = DeclaredTotals {
            subtotal: Some(dec!(200)),
            tax: Some(dec!(32)),
            total: Some(dec!(232)),
        };
        assert!(ok.verify(&computed).is_ok());

        let wrong_tax = DeclaredTotals {
            tax: Some(dec!(30)),
            ..Default::default()
        };
        assert!(matches!(
            wrong_tax.verify(&computed),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_order_number_format() {
        let number = generate_order_number();
        assert!(number.starts_with("FT-"));
        assert_eq!(number.matches('-').count(), 2);
        assert_ne!(number, generate_order_number());
    }

    #[test]
    fn test_transaction_status_parse() {
        assert_eq!(TransactionStatus::parse("completed"), TransactionStatus::Success);
        assert_eq!(TransactionStatus::parse("SUCCESS"), TransactionStatus::Success);
        assert_eq!(
            TransactionStatus::parse("in_process"),
            TransactionStatus::Other("in_process".into())
        );
    }
}
