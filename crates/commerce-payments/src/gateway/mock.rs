//! In-process gateway for development and tests
//!
//! Keeps payments in memory. `capture_or_confirm` approves a pending
//! payment; webhooks are signed with a hex HMAC in `x-mock-signature`.

use std::collections::HashMap;

use async_trait::async_trait;
use commerce_core::{SettlementOutcome, StatusTable};
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    HandleLine, HandleRequest, PaymentGateway, PaymentHandle, PaymentSnapshot, Provider,
    WebhookEvent, build_table, header_str, parse_body,
};
use crate::config::env_opt;
use crate::error::{PaymentError, Result};
use crate::signature;

const DEFAULT_WEBHOOK_SECRET: &str = "mock_webhook_secret";

#[derive(Clone, Debug)]
pub struct MockConfig {
    pub webhook_secret: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            webhook_secret: DEFAULT_WEBHOOK_SECRET.into(),
        }
    }
}

impl MockConfig {
    /// Enabled with `PAYMENTS_MOCK=true`
    pub fn from_env() -> Option<Self> {
        let enabled = env_opt("PAYMENTS_MOCK")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if !enabled {
            return None;
        }
        Some(Self {
            webhook_secret: env_opt("MOCK_WEBHOOK_SECRET")
                .unwrap_or_else(|| DEFAULT_WEBHOOK_SECRET.into()),
        })
    }
}

#[derive(Clone, Debug)]
struct MockPayment {
    status: String,
    amount: Decimal,
    order_number: String,
    items: Vec<HandleLine>,
}

/// Mock gateway
pub struct MockGateway {
    config: MockConfig,
    payments: RwLock<HashMap<String, MockPayment>>,
    table: StatusTable,
}

/// Webhook body accepted by the mock
#[derive(Debug, Deserialize)]
struct MockNotification {
    id: String,
    status: String,
    #[serde(default)]
    order_number: Option<String>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    items: Vec<HandleLine>,
}

impl MockGateway {
    pub const SIGNATURE_HEADER: &'static str = "x-mock-signature";

    pub fn new(config: MockConfig) -> Result<Self> {
        Ok(Self {
            config,
            payments: RwLock::new(HashMap::new()),
            table: status_table()?,
        })
    }

    /// Force the provider-side status of a payment
    pub async fn set_status(&self, reference: &str, status: &str) -> Result<()> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(reference)
            .ok_or_else(|| PaymentError::gateway(Provider::Mock, format!("unknown payment {reference}")))?;
        payment.status = status.to_string();
        Ok(())
    }

    /// Signature header value for a webhook body
    pub fn sign(&self, body: &str) -> Result<String> {
        signature::sign_hex(&self.config.webhook_secret, body.as_bytes())
    }

    fn snapshot(reference: &str, payment: &MockPayment) -> PaymentSnapshot {
        PaymentSnapshot {
            provider: Provider::Mock,
            reference: reference.to_string(),
            status: payment.status.clone(),
            amount: Some(payment.amount),
            order_number: Some(payment.order_number.clone()),
            items: payment.items.clone(),
            raw: json!({
                "id": reference,
                "status": payment.status,
                "amount": payment.amount,
                "order_number": payment.order_number,
            }),
        }
    }
}

pub fn status_table() -> Result<StatusTable> {
    build_table(
        Provider::Mock,
        &[
            ("approved", SettlementOutcome::Approved),
            ("pending", SettlementOutcome::Pending),
            ("rejected", SettlementOutcome::Rejected),
            ("cancelled", SettlementOutcome::Cancelled),
            ("refunded", SettlementOutcome::Refunded),
        ],
        SettlementOutcome::Pending,
    )
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> Provider {
        Provider::Mock
    }

    fn status_table(&self) -> &StatusTable {
        &self.table
    }

    async fn create_payment_handle(&self, request: &HandleRequest) -> Result<PaymentHandle> {
        let reference = format!("mock_{}", Uuid::new_v4().simple());
        let payment = MockPayment {
            status: "pending".into(),
            amount: request.total,
            order_number: request.order_number.clone(),
            items: request.items.clone(),
        };
        self.payments.write().await.insert(reference.clone(), payment);

        tracing::debug!(reference = %reference, order_number = %request.order_number, "Created mock payment");

        Ok(PaymentHandle {
            provider: Provider::Mock,
            checkout_url: Some(format!("https://mock.invalid/checkout/{reference}")),
            client_secret: None,
            handle_id: reference,
        })
    }

    async fn query_status(&self, reference: &str) -> Result<PaymentSnapshot> {
        let payments = self.payments.read().await;
        let payment = payments
            .get(reference)
            .ok_or_else(|| PaymentError::gateway(Provider::Mock, format!("unknown payment {reference}")))?;
        Ok(Self::snapshot(reference, payment))
    }

    async fn capture_or_confirm(&self, reference: &str) -> Result<PaymentSnapshot> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(reference)
            .ok_or_else(|| PaymentError::gateway(Provider::Mock, format!("unknown payment {reference}")))?;
        if payment.status == "pending" {
            payment.status = "approved".into();
        }
        Ok(Self::snapshot(reference, payment))
    }

    async fn verify_webhook(&self, payload: &str, headers: &HeaderMap) -> Result<WebhookEvent> {
        let provided = header_str(headers, Self::SIGNATURE_HEADER)
            .ok_or_else(|| PaymentError::Signature(format!("missing {} header", Self::SIGNATURE_HEADER)))?;
        signature::verify_hex(&self.config.webhook_secret, payload.as_bytes(), provided)?;

        let raw = parse_body(payload)?;
        let notification: MockNotification = serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        let snapshot = PaymentSnapshot {
            provider: Provider::Mock,
            reference: notification.id.clone(),
            status: notification.status.clone(),
            amount: notification.amount,
            order_number: notification.order_number,
            items: notification.items,
            raw: raw.clone(),
        };

        Ok(WebhookEvent {
            provider: Provider::Mock,
            event_type: format!("payment.{}", notification.status),
            reference: Some(notification.id),
            snapshot: Some(snapshot),
            raw,
        })
    }
}
