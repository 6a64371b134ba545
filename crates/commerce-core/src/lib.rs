//! # commerce-core
//!
//! Order lifecycle and payment settlement for the storefront.
//!
//! ## Components
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   SettlementCoordinator                      │
//! │   payment event ─► outcome ─► one SQL transaction            │
//! ├──────────────────┬──────────────────┬────────────────────────┤
//! │ InventoryLedger  │ OrderStore       │ TransactionLog         │
//! │ per-SKU stock,   │ orders + lines,  │ append-only payment    │
//! │ versioned rows   │ status catalog   │ audit, idempotency key │
//! └──────────────────┴──────────────────┴────────────────────────┘
//!                            SQLite (sqlx)
//! ```
//!
//! ## Order lifecycle
//!
//! ```text
//! Pending ──approved──► Processing ──► Shipped ──► Delivered ──► Completed
//!    │                      │
//!    ├──rejected/cancelled──┴──cancel──► Cancelled
//! ```
//!
//! Money is `rust_decimal::Decimal` in the API and integer cents in storage.

pub mod db;
pub mod error;
pub mod inventory;
pub mod model;
pub mod orders;
pub mod settlement;
pub mod status;
pub mod transactions;

#[cfg(test)]
mod test_utils;

pub use db::DbPool;
pub use error::{CoreError, Result};
pub use inventory::{Availability, InventoryLedger, StockLevel};
pub use model::{
    NewOrder, NewOrderItem, NewTransaction, Order, OrderItem, OrderTotals, SkuRef, StockLine,
    Transaction, TransactionStatus,
};
pub use orders::{OrderFilter, OrderStore};
pub use settlement::{
    Disposition, EventSource, OrderLocator, PaymentEvent, SettlementCoordinator, SettlementReport,
};
pub use status::{OrderStatus, PaymentStatus, SettlementOutcome, StatusTable};
pub use transactions::TransactionLog;
