//! MercadoPago binding
//!
//! Checkout Pro preferences over REST, amounts in decimal major units.
//! Webhooks only name the payment (`{type:"payment", data:{id}}`); its state
//! is fetched afterwards with [`PaymentGateway::query_status`].

use async_trait::async_trait;
use chrono::Utc;
use commerce_core::{SettlementOutcome, StatusTable};
use reqwest::header::HeaderMap;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::{
    HandleLine, HandleRequest, PaymentGateway, PaymentHandle, PaymentSnapshot, Provider,
    WebhookEvent, build_table, decimal_field, header_str, http_client, id_field, parse_body,
    read_json, send_error,
};
use crate::config::env_opt;
use crate::error::{PaymentError, Result};
use crate::money::to_major_number;
use crate::signature;

const DEFAULT_API_BASE: &str = "https://api.mercadopago.com";

/// MercadoPago credentials
#[derive(Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    /// Secret for `x-signature`; webhooks are refused without it
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

impl MercadoPagoConfig {
    /// `None` unless `MERCADOPAGO_ACCESS_TOKEN` is set
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_token: env_opt("MERCADOPAGO_ACCESS_TOKEN")?,
            webhook_secret: env_opt("MERCADOPAGO_WEBHOOK_SECRET"),
            api_base: env_opt("MERCADOPAGO_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
        })
    }
}

/// MercadoPago gateway
pub struct MercadoPagoGateway {
    http: reqwest::Client,
    config: MercadoPagoConfig,
    table: StatusTable,
}

impl MercadoPagoGateway {
    pub fn new(config: MercadoPagoConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(Provider::MercadoPago)?,
            config,
            table: status_table()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    async fn get_payment(&self, reference: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url(&format!("/v1/payments/{reference}")))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| send_error(Provider::MercadoPago, &e))?;
        read_json(Provider::MercadoPago, response).await
    }
}

/// MercadoPago payment statuses
pub fn status_table() -> Result<StatusTable> {
    build_table(
        Provider::MercadoPago,
        &[
            ("approved", SettlementOutcome::Approved),
            ("authorized", SettlementOutcome::Pending),
            ("pending", SettlementOutcome::Pending),
            ("in_process", SettlementOutcome::Pending),
            ("in_mediation", SettlementOutcome::Pending),
            ("rejected", SettlementOutcome::Rejected),
            ("cancelled", SettlementOutcome::Cancelled),
            ("refunded", SettlementOutcome::Refunded),
            ("charged_back", SettlementOutcome::Refunded),
        ],
        SettlementOutcome::Pending,
    )
}

/// Item id of the line carrying taxes and shipping
const ADJUSTMENT_LINE_ID: &str = "taxes-shipping";
/// Item id of the single line used when a discount exceeds taxes and shipping
const ORDER_LINE_ID: &str = "order-total";

/// Preference items whose sum is exactly `request.total`.
///
/// Preferences take no negative lines, so a discount larger than taxes plus
/// shipping collapses the cart into one line priced at the order total.
fn preference_items(request: &HandleRequest) -> Result<Vec<Value>> {
    if request.total <= Decimal::ZERO {
        return Err(PaymentError::Amount(format!(
            "order {} total {} is not chargeable",
            request.order_number, request.total
        )));
    }

    let lines_total: Decimal = request
        .items
        .iter()
        .map(|l| l.unit_price * Decimal::from(l.quantity))
        .sum();
    let extra = request.total - lines_total;

    if extra < Decimal::ZERO {
        return Ok(vec![json!({
            "id": ORDER_LINE_ID,
            "title": format!("Pedido {}", request.order_number),
            "quantity": 1,
            "unit_price": to_major_number(request.total)?,
            "currency_id": request.currency,
        })]);
    }

    let mut items = request
        .items
        .iter()
        .map(|line| -> Result<Value> {
            Ok(json!({
                "id": line.variant_id.clone().unwrap_or_else(|| line.product_id.clone()),
                "title": line.title(),
                "quantity": line.quantity,
                "unit_price": to_major_number(line.unit_price)?,
                "currency_id": request.currency,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    if extra > Decimal::ZERO {
        items.push(json!({
            "id": ADJUSTMENT_LINE_ID,
            "title": "Impuestos y envío",
            "quantity": 1,
            "unit_price": to_major_number(extra)?,
            "currency_id": request.currency,
        }));
    }
    Ok(items)
}

/// Preference body for Checkout Pro
fn preference_body(request: &HandleRequest) -> Result<Value> {
    let mut body = json!({
        "items": preference_items(request)?,
        "external_reference": request.order_number,
        "back_urls": {
            "success": request.return_urls.success,
            "failure": request.return_urls.failure,
            "pending": request.return_urls.pending.clone().unwrap_or_else(|| request.return_urls.failure.clone()),
        },
        "auto_return": "approved",
        "metadata": { "order_number": request.order_number },
    });

    if let Some(url) = &request.return_urls.notification {
        body["notification_url"] = json!(url);
    }
    if let Some(email) = &request.customer_email {
        body["payer"] = json!({ "email": email });
    }
    Ok(body)
}

fn snapshot(payment: &Value) -> Result<PaymentSnapshot> {
    let reference = id_field(&payment["id"])
        .ok_or_else(|| PaymentError::gateway_with_payload(Provider::MercadoPago, "payment without id", payment.clone()))?;
    let status = payment["status"]
        .as_str()
        .ok_or_else(|| PaymentError::gateway_with_payload(Provider::MercadoPago, "payment without status", payment.clone()))?
        .to_string();

    let items = payment["additional_info"]["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(HandleLine {
                        product_id: id_field(&item["id"])?,
                        variant_id: None,
                        name: item["title"].as_str().map(str::to_string),
                        quantity: decimal_field(&item["quantity"])
                            .and_then(|q| rust_decimal::prelude::ToPrimitive::to_i64(&q))?,
                        unit_price: decimal_field(&item["unit_price"])?,
                    })
                })
                .filter(|line| line.product_id != ADJUSTMENT_LINE_ID && line.product_id != ORDER_LINE_ID)
                .collect()
        })
        .unwrap_or_default();

    Ok(PaymentSnapshot {
        provider: Provider::MercadoPago,
        reference,
        status,
        amount: decimal_field(&payment["transaction_amount"]),
        order_number: payment["external_reference"].as_str().map(str::to_string),
        items,
        raw: payment.clone(),
    })
}

/// Verify and parse a webhook body; `now` in unix seconds
fn parse_webhook(
    payload: &str,
    headers: &HeaderMap,
    secret: Option<&str>,
    now: i64,
) -> Result<WebhookEvent> {
    let secret = secret
        .ok_or_else(|| PaymentError::Signature("MercadoPago webhook secret not configured".into()))?;
    let raw = parse_body(payload)?;

    let event_type = raw["type"]
        .as_str()
        .or_else(|| raw["topic"].as_str())
        .unwrap_or_default()
        .to_string();
    let data_id = id_field(&raw["data"]["id"]);

    let header = header_str(headers, "x-signature")
        .ok_or_else(|| PaymentError::Signature("missing x-signature header".into()))?;
    let request_id = header_str(headers, "x-request-id").unwrap_or_default();
    signature::verify_mercadopago(
        header,
        data_id.as_deref().unwrap_or_default(),
        request_id,
        secret,
        now,
    )?;

    let reference = if event_type == "payment" { data_id } else { None };
    Ok(WebhookEvent {
        provider: Provider::MercadoPago,
        event_type,
        reference,
        snapshot: None,
        raw,
    })
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn provider(&self) -> Provider {
        Provider::MercadoPago
    }

    fn status_table(&self) -> &StatusTable {
        &self.table
    }

    async fn create_payment_handle(&self, request: &HandleRequest) -> Result<PaymentHandle> {
        let body = preference_body(request)?;
        let response = self
            .http
            .post(self.url("/checkout/preferences"))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(Provider::MercadoPago, &e))?;
        let preference = read_json(Provider::MercadoPago, response).await?;

        let handle_id = id_field(&preference["id"]).ok_or_else(|| {
            PaymentError::gateway_with_payload(Provider::MercadoPago, "preference without id", preference.clone())
        })?;
        let checkout_url = preference["init_point"]
            .as_str()
            .or_else(|| preference["sandbox_init_point"].as_str())
            .map(str::to_string);

        tracing::info!(
            preference_id = %handle_id,
            order_number = %request.order_number,
            "Created MercadoPago preference"
        );

        Ok(PaymentHandle {
            provider: Provider::MercadoPago,
            handle_id,
            checkout_url,
            client_secret: None,
        })
    }

    async fn query_status(&self, reference: &str) -> Result<PaymentSnapshot> {
        let payment = self.get_payment(reference).await?;
        snapshot(&payment)
    }

    async fn capture_or_confirm(&self, reference: &str) -> Result<PaymentSnapshot> {
        let payment = self.get_payment(reference).await?;
        if payment["status"].as_str() != Some("authorized") {
            return snapshot(&payment);
        }

        let response = self
            .http
            .put(self.url(&format!("/v1/payments/{reference}")))
            .bearer_auth(&self.config.access_token)
            .json(&json!({ "capture": true }))
            .send()
            .await
            .map_err(|e| send_error(Provider::MercadoPago, &e))?;
        let captured = read_json(Provider::MercadoPago, response).await?;
        tracing::info!(payment_id = %reference, "Captured MercadoPago payment");
        snapshot(&captured)
    }

    async fn verify_webhook(&self, payload: &str, headers: &HeaderMap) -> Result<WebhookEvent> {
        parse_webhook(
            payload,
            headers,
            self.config.webhook_secret.as_deref(),
            Utc::now().timestamp(),
        )
    }
}
