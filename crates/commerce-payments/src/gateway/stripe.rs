//! Stripe binding
//!
//! PaymentIntents through `async-stripe`, amounts in minor units. The client
//! confirms the intent with Stripe.js using the returned client secret.

use std::collections::HashMap;

use ::stripe::{
    CapturePaymentIntent, Client, CreatePaymentIntent, Currency, PaymentIntent, PaymentIntentId,
};
use async_trait::async_trait;
use chrono::Utc;
use commerce_core::{SettlementOutcome, StatusTable};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use super::{
    HandleRequest, PaymentGateway, PaymentHandle, PaymentSnapshot, Provider, WebhookEvent,
    build_table, header_str, parse_body,
};
use crate::config::env_opt;
use crate::error::{PaymentError, Result};
use crate::money::{from_minor_units, to_minor_units};
use crate::signature;

/// Stripe credentials
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

impl StripeConfig {
    /// `None` unless `STRIPE_SECRET_KEY` and `STRIPE_WEBHOOK_SECRET` are set
    pub fn from_env() -> Option<Self> {
        Some(Self {
            secret_key: env_opt("STRIPE_SECRET_KEY")?,
            webhook_secret: env_opt("STRIPE_WEBHOOK_SECRET")?,
        })
    }
}

/// Stripe gateway
pub struct StripeGateway {
    client: Client,
    webhook_secret: String,
    table: StatusTable,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(config.secret_key.clone()),
            webhook_secret: config.webhook_secret.clone(),
            table: status_table()?,
        })
    }

    async fn retrieve(&self, reference: &str) -> Result<PaymentIntent> {
        let id: PaymentIntentId = reference
            .parse()
            .map_err(|_| PaymentError::gateway(Provider::Stripe, format!("invalid payment intent id {reference}")))?;
        PaymentIntent::retrieve(&self.client, &id, &[])
            .await
            .map_err(|e| PaymentError::gateway(Provider::Stripe, e.to_string()))
    }
}

/// Stripe PaymentIntent statuses, plus the webhook-only failure/refund states
pub fn status_table() -> Result<StatusTable> {
    build_table(
        Provider::Stripe,
        &[
            ("succeeded", SettlementOutcome::Approved),
            ("requires_payment_method", SettlementOutcome::Pending),
            ("requires_confirmation", SettlementOutcome::Pending),
            ("requires_action", SettlementOutcome::Pending),
            ("requires_capture", SettlementOutcome::Pending),
            ("processing", SettlementOutcome::Pending),
            ("canceled", SettlementOutcome::Cancelled),
            ("payment_failed", SettlementOutcome::Rejected),
            ("refunded", SettlementOutcome::Refunded),
            // Audited only; the order stays paid and stock stays debited
            ("partially_refunded", SettlementOutcome::Pending),
        ],
        SettlementOutcome::Pending,
    )
}

fn currency(code: &str) -> Result<Currency> {
    serde_json::from_value(Value::String(code.trim().to_lowercase()))
        .map_err(|_| PaymentError::Config(format!("currency {code} not supported by Stripe")))
}

/// PaymentIntent fields settlement needs
#[derive(Deserialize)]
struct IntentObject {
    id: String,
    status: String,
    amount: i64,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

/// Charge fields carried by `charge.refunded`
#[derive(Deserialize)]
struct ChargeObject {
    payment_intent: Option<String>,
    amount: i64,
    amount_refunded: i64,
    /// True only once the whole charge has been refunded
    #[serde(default)]
    refunded: bool,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: Value,
}

fn typed<T: serde::de::DeserializeOwned>(object: &Value, what: &str) -> Result<T> {
    serde_json::from_value(object.clone())
        .map_err(|e| PaymentError::WebhookParse(format!("unexpected {what} shape: {e}")))
}

impl IntentObject {
    fn into_snapshot(self, status: Option<&str>, raw: Value) -> PaymentSnapshot {
        PaymentSnapshot {
            provider: Provider::Stripe,
            reference: self.id,
            status: status.map_or(self.status, str::to_string),
            amount: Some(from_minor_units(self.amount)),
            order_number: order_number(self.metadata.as_ref()),
            items: Vec::new(),
            raw,
        }
    }
}

impl ChargeObject {
    fn into_snapshot(self, raw: Value) -> Result<PaymentSnapshot> {
        let reference = self.payment_intent.ok_or_else(|| {
            PaymentError::WebhookParse("refunded charge without payment_intent".into())
        })?;
        let full = self.refunded || self.amount_refunded >= self.amount;
        Ok(PaymentSnapshot {
            provider: Provider::Stripe,
            reference,
            status: if full { "refunded" } else { "partially_refunded" }.into(),
            amount: Some(from_minor_units(self.amount_refunded)),
            order_number: order_number(self.metadata.as_ref()),
            items: Vec::new(),
            raw,
        })
    }
}

fn order_number(metadata: Option<&HashMap<String, String>>) -> Option<String> {
    metadata.and_then(|m| m.get("order_number")).cloned()
}

fn intent_snapshot(intent: &PaymentIntent) -> Result<PaymentSnapshot> {
    let raw = serde_json::to_value(intent)
        .map_err(|e| PaymentError::gateway(Provider::Stripe, format!("unexpected intent shape: {e}")))?;
    let object: IntentObject = serde_json::from_value(raw.clone())
        .map_err(|e| PaymentError::gateway(Provider::Stripe, format!("unexpected intent shape: {e}")))?;
    Ok(object.into_snapshot(None, raw))
}

/// Turn a verified event body into a webhook event
fn parse_event(payload: &str) -> Result<WebhookEvent> {
    let raw = parse_body(payload)?;
    let event: StripeEvent =
        serde_json::from_value(raw.clone()).map_err(|e| PaymentError::WebhookParse(e.to_string()))?;
    let object = &event.data.object;

    let snapshot = match event.event_type.as_str() {
        "payment_intent.succeeded"
        | "payment_intent.processing"
        | "payment_intent.canceled"
        | "payment_intent.requires_action"
        | "payment_intent.amount_capturable_updated" => {
            Some(typed::<IntentObject>(object, "payment intent")?.into_snapshot(None, object.clone()))
        }
        "payment_intent.payment_failed" => Some(
            typed::<IntentObject>(object, "payment intent")?
                .into_snapshot(Some("payment_failed"), object.clone()),
        ),
        "charge.refunded" => Some(typed::<ChargeObject>(object, "charge")?.into_snapshot(object.clone())?),
        _ => None,
    };

    Ok(WebhookEvent {
        provider: Provider::Stripe,
        event_type: event.event_type,
        reference: snapshot.as_ref().map(|s| s.reference.clone()),
        snapshot,
        raw,
    })
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn status_table(&self) -> &StatusTable {
        &self.table
    }

    async fn create_payment_handle(&self, request: &HandleRequest) -> Result<PaymentHandle> {
        let amount = to_minor_units(request.total)?;
        let mut params = CreatePaymentIntent::new(amount, currency(&request.currency)?);

        let description = format!("Pedido {}", request.order_number);
        params.description = Some(&description);
        params.receipt_email = request.customer_email.as_deref();

        let mut metadata = HashMap::new();
        metadata.insert("order_number".to_string(), request.order_number.clone());
        params.metadata = Some(metadata);

        let intent = PaymentIntent::create(&self.client, params)
            .await
            .map_err(|e| PaymentError::gateway(Provider::Stripe, e.to_string()))?;

        tracing::info!(
            intent_id = %intent.id,
            order_number = %request.order_number,
            amount,
            "Created Stripe payment intent"
        );

        Ok(PaymentHandle {
            provider: Provider::Stripe,
            handle_id: intent.id.to_string(),
            checkout_url: None,
            client_secret: intent.client_secret,
        })
    }

    async fn query_status(&self, reference: &str) -> Result<PaymentSnapshot> {
        let intent = self.retrieve(reference).await?;
        intent_snapshot(&intent)
    }

    async fn capture_or_confirm(&self, reference: &str) -> Result<PaymentSnapshot> {
        let intent = self.retrieve(reference).await?;
        let current = intent_snapshot(&intent)?;
        if current.status != "requires_capture" {
            return Ok(current);
        }

        let captured = PaymentIntent::capture(&self.client, reference, CapturePaymentIntent::default())
            .await
            .map_err(|e| PaymentError::gateway(Provider::Stripe, e.to_string()))?;
        tracing::info!(intent_id = %reference, "Captured Stripe payment intent");
        intent_snapshot(&captured)
    }

    async fn verify_webhook(&self, payload: &str, headers: &HeaderMap) -> Result<WebhookEvent> {
        let header = header_str(headers, "stripe-signature")
            .ok_or_else(|| PaymentError::Signature("missing stripe-signature header".into()))?;
        signature::verify_stripe(header, payload, &self.webhook_secret, Utc::now().timestamp())?;
        parse_event(payload)
    }
}
