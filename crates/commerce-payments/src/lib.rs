//! # commerce-payments
//!
//! Payment Gateway Adapter: one contract over Stripe, MercadoPago, PayPal
//! and Conekta, plus an in-process mock.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  create_payment_handle  ┌──────────────┐
//! │  Checkout   │────────────────────────▶│   Provider   │
//! │  (server)   │◀────────────────────────│ (hosted page)│
//! └──────┬──────┘     handle / url        └──────┬───────┘
//!        │                                       │
//!        │ capture_or_confirm / query_status     │ webhook
//!        ▼                                       ▼
//! ┌─────────────┐                         ┌──────────────┐
//! │  Snapshot   │◀────────────────────────│verify_webhook│
//! └──────┬──────┘                         └──────────────┘
//!        │ status table
//!        ▼
//!  SettlementOutcome ──▶ commerce_core::SettlementCoordinator
//! ```
//!
//! Amounts cross the boundary in each provider's units: integer minor units
//! for Stripe and Conekta, decimal major units for MercadoPago and PayPal.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use commerce_payments::{GatewayRegistry, PaymentsConfig};
//!
//! let registry = GatewayRegistry::from_config(&PaymentsConfig::from_env())?;
//! let gateway = registry.resolve("mercadopago")?;
//! let snapshot = gateway.query_status("1234567890").await?;
//! let outcome = gateway.outcome(&snapshot);
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod money;
pub mod registry;
pub mod signature;

pub use config::PaymentsConfig;
pub use error::{PaymentError, Result};
pub use gateway::{
    HandleLine, HandleRequest, PaymentGateway, PaymentHandle, PaymentSnapshot, Provider,
    ReturnUrls, WebhookEvent,
};
pub use registry::GatewayRegistry;
