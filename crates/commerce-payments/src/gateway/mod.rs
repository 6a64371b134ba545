//! Payment Gateway Adapter
//!
//! One capability contract over divergent provider APIs. Each binding owns
//! its unit conversion, its webhook verification and its status table.

mod conekta;
mod mercadopago;
mod mock;
mod paypal;
mod stripe;

pub use self::conekta::{ConektaConfig, ConektaGateway};
pub use self::mercadopago::{MercadoPagoConfig, MercadoPagoGateway};
pub use self::mock::{MockConfig, MockGateway};
pub use self::paypal::{PayPalConfig, PayPalGateway};
pub use self::stripe::{StripeConfig, StripeGateway};

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use commerce_core::{SettlementOutcome, StatusTable};
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PaymentError, Result};

/// Supported payment providers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Stripe,
    MercadoPago,
    PayPal,
    Conekta,
    Mock,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::MercadoPago => "mercadopago",
            Provider::PayPal => "paypal",
            Provider::Conekta => "conekta",
            Provider::Mock => "mock",
        }
    }
}

impl FromStr for Provider {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stripe" => Ok(Provider::Stripe),
            "mercadopago" | "mercado-pago" | "mercado_pago" => Ok(Provider::MercadoPago),
            "paypal" => Ok(Provider::PayPal),
            "conekta" => Ok(Provider::Conekta),
            "mock" => Ok(Provider::Mock),
            other => Err(PaymentError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchasable line sent to the provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandleLine {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl HandleLine {
    fn title(&self) -> String {
        self.name.clone().unwrap_or_else(|| match &self.variant_id {
            Some(variant) => format!("{} ({variant})", self.product_id),
            None => self.product_id.clone(),
        })
    }
}

/// Where the provider sends the shopper (and its notifications)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReturnUrls {
    pub success: String,
    pub failure: String,
    #[serde(default)]
    pub pending: Option<String>,
    #[serde(default)]
    pub notification: Option<String>,
}

impl ReturnUrls {
    /// Storefront callback pages under the public site URL
    pub fn for_site(site_url: &str, provider: Provider, order_number: &str) -> Self {
        let base = site_url.trim_end_matches('/');
        Self {
            success: format!("{base}/checkout/success?order={order_number}"),
            failure: format!("{base}/checkout/failure?order={order_number}"),
            pending: Some(format!("{base}/checkout/pending?order={order_number}")),
            notification: Some(format!("{base}/payments/{provider}/webhook")),
        }
    }
}

/// Request to open a payment with a provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandleRequest {
    pub order_number: String,
    pub items: Vec<HandleLine>,
    /// Amount to charge, in major units
    pub total: Decimal,
    /// ISO 4217 code, e.g. `MXN`
    pub currency: String,
    pub return_urls: ReturnUrls,
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// A provider-side payment object: preference, intent or order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentHandle {
    pub provider: Provider,
    pub handle_id: String,
    /// Hosted page to redirect the shopper to
    pub checkout_url: Option<String>,
    /// Secret for client-side confirmation (Stripe Elements)
    pub client_secret: Option<String>,
}

/// Provider view of a payment at one point in time
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub provider: Provider,
    /// Gateway reference (idempotency key)
    pub reference: String,
    /// Raw provider status, resolved through the provider's [`StatusTable`]
    pub status: String,
    pub amount: Option<Decimal>,
    pub order_number: Option<String>,
    /// Lines as the provider recorded them, when it keeps them
    #[serde(default)]
    pub items: Vec<HandleLine>,
    pub raw: Value,
}

/// A verified webhook notification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: Provider,
    pub event_type: String,
    /// Payment the event is about; `None` for events we do not act on
    pub reference: Option<String>,
    /// Present when the payload already carries the payment state
    pub snapshot: Option<PaymentSnapshot>,
    pub raw: Value,
}

/// Payment gateway trait (Strategy pattern)
///
/// Implemented for Stripe, MercadoPago, PayPal, Conekta and the mock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Raw status -> settlement outcome
    fn status_table(&self) -> &StatusTable;

    /// Create the provider-side payment object for an order
    async fn create_payment_handle(&self, request: &HandleRequest) -> Result<PaymentHandle>;

    /// Fetch the current state of a payment
    async fn query_status(&self, reference: &str) -> Result<PaymentSnapshot>;

    /// Capture an authorized payment, or report its state if there is
    /// nothing to capture
    async fn capture_or_confirm(&self, reference: &str) -> Result<PaymentSnapshot>;

    /// Verify the signature of a raw webhook body and parse it
    async fn verify_webhook(&self, payload: &str, headers: &HeaderMap) -> Result<WebhookEvent>;

    fn outcome(&self, snapshot: &PaymentSnapshot) -> SettlementOutcome {
        self.status_table().resolve(&snapshot.status)
    }
}

/// Build a provider status table, mapping validation failures to config errors
pub(crate) fn build_table(
    provider: Provider,
    entries: &[(&str, SettlementOutcome)],
    default: SettlementOutcome,
) -> Result<StatusTable> {
    StatusTable::new(provider.as_str(), entries, default)
        .map_err(|e| PaymentError::Config(e.to_string()))
}

pub(crate) fn http_client(provider: Provider) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| PaymentError::Config(format!("{provider}: http client: {e}")))
}

/// Read a JSON response, turning non-2xx answers into gateway errors that
/// keep the provider payload for the logs
pub(crate) async fn read_json(provider: Provider, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| PaymentError::gateway(provider, format!("reading response: {e}")))?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

    if !status.is_success() {
        return Err(PaymentError::gateway_with_payload(
            provider,
            format!("HTTP {status}"),
            body,
        ));
    }
    Ok(body)
}

pub(crate) fn send_error(provider: Provider, e: &reqwest::Error) -> PaymentError {
    PaymentError::gateway(provider, format!("request failed: {e}"))
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// JSON value as a decimal, accepting numbers and numeric strings
pub(crate) fn decimal_field(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// JSON value as a string id, accepting numbers (MercadoPago ids)
pub(crate) fn id_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_body(payload: &str) -> Result<Value> {
    serde_json::from_str(payload).map_err(|e| PaymentError::WebhookParse(e.to_string()))
}
