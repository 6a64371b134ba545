//! PayPal binding
//!
//! Orders v2 over REST with an OAuth client-credentials token cached in
//! memory. Amounts are major-unit strings (`"232.00"`). Webhooks are verified
//! remotely through `/v1/notifications/verify-webhook-signature`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use commerce_core::{SettlementOutcome, StatusTable};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use super::{
    HandleRequest, PaymentGateway, PaymentHandle, PaymentSnapshot, Provider, WebhookEvent,
    build_table, decimal_field, header_str, http_client, id_field, parse_body, read_json,
    send_error,
};
use crate::config::env_opt;
use crate::error::{PaymentError, Result};
use crate::money::to_major_string;

const DEFAULT_API_BASE: &str = "https://api-m.sandbox.paypal.com";

/// Refresh the token this long before PayPal says it expires
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// PayPal credentials
#[derive(Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Webhook id from the PayPal dashboard; webhooks are refused without it
    pub webhook_id: Option<String>,
    pub api_base: String,
}

impl PayPalConfig {
    /// `None` unless `PAYPAL_CLIENT_ID` and `PAYPAL_CLIENT_SECRET` are set
    pub fn from_env() -> Option<Self> {
        Some(Self {
            client_id: env_opt("PAYPAL_CLIENT_ID")?,
            client_secret: env_opt("PAYPAL_CLIENT_SECRET")?,
            webhook_id: env_opt("PAYPAL_WEBHOOK_ID"),
            api_base: env_opt("PAYPAL_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
        })
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// PayPal gateway
pub struct PayPalGateway {
    http: reqwest::Client,
    config: PayPalConfig,
    token: RwLock<Option<CachedToken>>,
    table: StatusTable,
}

impl PayPalGateway {
    pub fn new(config: PayPalConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(Provider::PayPal)?,
            config,
            token: RwLock::new(None),
            table: status_table()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(|e| send_error(Provider::PayPal, &e))?;
        let body = read_json(Provider::PayPal, response).await?;

        let value = body["access_token"]
            .as_str()
            .ok_or_else(|| PaymentError::gateway(Provider::PayPal, "token response without access_token"))?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(300);
        *slot = Some(CachedToken {
            value: value.clone(),
            expires_at: Utc::now() + Duration::seconds(expires_in - TOKEN_EXPIRY_MARGIN_SECS),
        });

        tracing::debug!(expires_in, "Refreshed PayPal access token");
        Ok(value)
    }

    async fn get_order(&self, reference: &str) -> Result<Value> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("/v2/checkout/orders/{reference}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| send_error(Provider::PayPal, &e))?;
        read_json(Provider::PayPal, response).await
    }

    async fn verify_remote(&self, event: &Value, headers: &HeaderMap) -> Result<()> {
        let webhook_id = self
            .config
            .webhook_id
            .as_deref()
            .ok_or_else(|| PaymentError::Signature("PAYPAL_WEBHOOK_ID not configured".into()))?;
        let body = verification_body(headers, webhook_id, event)?;

        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(Provider::PayPal, &e))?;
        let result = read_json(Provider::PayPal, response).await?;

        match result["verification_status"].as_str() {
            Some("SUCCESS") => Ok(()),
            other => Err(PaymentError::Signature(format!(
                "PayPal verification status {}",
                other.unwrap_or("missing")
            ))),
        }
    }
}

/// PayPal order and capture statuses (matched case-insensitively)
pub fn status_table() -> Result<StatusTable> {
    build_table(
        Provider::PayPal,
        &[
            ("completed", SettlementOutcome::Approved),
            ("approved", SettlementOutcome::Pending),
            ("created", SettlementOutcome::Pending),
            ("saved", SettlementOutcome::Pending),
            ("payer_action_required", SettlementOutcome::Pending),
            ("pending", SettlementOutcome::Pending),
            ("voided", SettlementOutcome::Cancelled),
            ("declined", SettlementOutcome::Rejected),
            ("denied", SettlementOutcome::Rejected),
            ("refunded", SettlementOutcome::Refunded),
        ],
        SettlementOutcome::Pending,
    )
}

fn order_body(request: &HandleRequest) -> Result<Value> {
    Ok(json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "reference_id": request.order_number,
            "custom_id": request.order_number,
            "description": format!("Pedido {}", request.order_number),
            "amount": {
                "currency_code": request.currency.to_uppercase(),
                "value": to_major_string(request.total)?,
            },
        }],
        "application_context": {
            "return_url": request.return_urls.success,
            "cancel_url": request.return_urls.failure,
            "user_action": "PAY_NOW",
        },
    }))
}

fn verification_body(headers: &HeaderMap, webhook_id: &str, event: &Value) -> Result<Value> {
    let header = |name: &str| {
        header_str(headers, name)
            .map(str::to_string)
            .ok_or_else(|| PaymentError::Signature(format!("missing {name} header")))
    };
    Ok(json!({
        "auth_algo": header("paypal-auth-algo")?,
        "cert_url": header("paypal-cert-url")?,
        "transmission_id": header("paypal-transmission-id")?,
        "transmission_sig": header("paypal-transmission-sig")?,
        "transmission_time": header("paypal-transmission-time")?,
        "webhook_id": webhook_id,
        "webhook_event": event,
    }))
}

/// Snapshot from an order (GET or capture response)
fn order_snapshot(order: &Value) -> Result<PaymentSnapshot> {
    let reference = id_field(&order["id"])
        .ok_or_else(|| PaymentError::gateway_with_payload(Provider::PayPal, "order without id", order.clone()))?;
    let status = order["status"]
        .as_str()
        .ok_or_else(|| PaymentError::gateway_with_payload(Provider::PayPal, "order without status", order.clone()))?
        .to_lowercase();

    let unit = &order["purchase_units"][0];
    let amount = decimal_field(&unit["payments"]["captures"][0]["amount"]["value"])
        .or_else(|| decimal_field(&unit["amount"]["value"]));
    let order_number = unit["custom_id"]
        .as_str()
        .or_else(|| unit["reference_id"].as_str())
        .map(str::to_string);

    Ok(PaymentSnapshot {
        provider: Provider::PayPal,
        reference,
        status,
        amount,
        order_number,
        items: Vec::new(),
        raw: order.clone(),
    })
}

/// Map a verified event to the order it concerns
fn parse_event(raw: Value) -> WebhookEvent {
    let event_type = raw["event_type"].as_str().unwrap_or_default().to_string();
    let resource = &raw["resource"];
    let related_order = id_field(&resource["supplementary_data"]["related_ids"]["order_id"]);

    let capture_snapshot = |status: &str| {
        related_order.clone().map(|reference| PaymentSnapshot {
            provider: Provider::PayPal,
            reference,
            status: status.to_string(),
            amount: decimal_field(&resource["amount"]["value"]),
            order_number: resource["custom_id"].as_str().map(str::to_string),
            items: Vec::new(),
            raw: resource.clone(),
        })
    };

    let (reference, snapshot) = match event_type.as_str() {
        "CHECKOUT.ORDER.APPROVED" | "CHECKOUT.ORDER.COMPLETED" => (id_field(&resource["id"]), None),
        "PAYMENT.CAPTURE.COMPLETED" => (related_order.clone(), capture_snapshot("completed")),
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => {
            (related_order.clone(), capture_snapshot("declined"))
        }
        "PAYMENT.CAPTURE.REFUNDED" => (related_order.clone(), capture_snapshot("refunded")),
        _ => (None, None),
    };

    WebhookEvent {
        provider: Provider::PayPal,
        event_type,
        reference,
        snapshot,
        raw,
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    fn provider(&self) -> Provider {
        Provider::PayPal
    }

    fn status_table(&self) -> &StatusTable {
        &self.table
    }

    async fn create_payment_handle(&self, request: &HandleRequest) -> Result<PaymentHandle> {
        let body = order_body(request)?;
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(Provider::PayPal, &e))?;
        let order = read_json(Provider::PayPal, response).await?;

        let handle_id = id_field(&order["id"]).ok_or_else(|| {
            PaymentError::gateway_with_payload(Provider::PayPal, "order without id", order.clone())
        })?;
        let checkout_url = order["links"].as_array().and_then(|links| {
            links
                .iter()
                .find(|l| matches!(l["rel"].as_str(), Some("approve" | "payer-action")))
                .and_then(|l| l["href"].as_str())
                .map(str::to_string)
        });

        tracing::info!(
            paypal_order = %handle_id,
            order_number = %request.order_number,
            "Created PayPal order"
        );

        Ok(PaymentHandle {
            provider: Provider::PayPal,
            handle_id,
            checkout_url,
            client_secret: None,
        })
    }

    async fn query_status(&self, reference: &str) -> Result<PaymentSnapshot> {
        let order = self.get_order(reference).await?;
        order_snapshot(&order)
    }

    async fn capture_or_confirm(&self, reference: &str) -> Result<PaymentSnapshot> {
        let order = self.get_order(reference).await?;
        if order["status"].as_str() != Some("APPROVED") {
            return order_snapshot(&order);
        }

        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{reference}/capture")))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| send_error(Provider::PayPal, &e))?;
        let captured = read_json(Provider::PayPal, response).await?;
        tracing::info!(paypal_order = %reference, "Captured PayPal order");
        order_snapshot(&captured)
    }

    async fn verify_webhook(&self, payload: &str, headers: &HeaderMap) -> Result<WebhookEvent> {
        let raw = parse_body(payload)?;
        self.verify_remote(&raw, headers).await?;
        Ok(parse_event(raw))
    }
}
