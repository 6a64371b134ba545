//! Conekta binding
//!
//! Hosted-checkout orders over REST, amounts in integer minor units.

use async_trait::async_trait;
use commerce_core::{SettlementOutcome, StatusTable};
use reqwest::header::{ACCEPT, HeaderMap};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::{
    HandleRequest, PaymentGateway, PaymentHandle, PaymentSnapshot, Provider, WebhookEvent,
    build_table, header_str, http_client, id_field, parse_body, read_json, send_error,
};
use crate::config::env_opt;
use crate::error::{PaymentError, Result};
use crate::money::{from_minor_units, to_minor_units};
use crate::signature;

const DEFAULT_API_BASE: &str = "https://api.conekta.io";
const API_VERSION_ACCEPT: &str = "application/vnd.conekta-v2.1.0+json";

/// Conekta credentials
#[derive(Clone)]
pub struct ConektaConfig {
    pub api_key: String,
    /// Secret for the `digest` header; webhooks are refused without it
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

impl ConektaConfig {
    /// `None` unless `CONEKTA_API_KEY` is set
    pub fn from_env() -> Option<Self> {
        Some(Self {
            api_key: env_opt("CONEKTA_API_KEY")?,
            webhook_secret: env_opt("CONEKTA_WEBHOOK_SECRET"),
            api_base: env_opt("CONEKTA_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
        })
    }
}

/// Conekta gateway
pub struct ConektaGateway {
    http: reqwest::Client,
    config: ConektaConfig,
    table: StatusTable,
}

impl ConektaGateway {
    pub fn new(config: ConektaConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(Provider::Conekta)?,
            config,
            table: status_table()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.config.api_key)
            .header(ACCEPT, API_VERSION_ACCEPT)
    }

    async fn get_order(&self, reference: &str) -> Result<Value> {
        let response = self
            .request(reqwest::Method::GET, &format!("/orders/{reference}"))
            .send()
            .await
            .map_err(|e| send_error(Provider::Conekta, &e))?;
        read_json(Provider::Conekta, response).await
    }
}

/// Conekta order `payment_status` values
pub fn status_table() -> Result<StatusTable> {
    build_table(
        Provider::Conekta,
        &[
            ("paid", SettlementOutcome::Approved),
            ("pending_payment", SettlementOutcome::Pending),
            ("pre_authorized", SettlementOutcome::Pending),
            ("declined", SettlementOutcome::Rejected),
            ("expired", SettlementOutcome::Cancelled),
            ("canceled", SettlementOutcome::Cancelled),
            ("voided", SettlementOutcome::Cancelled),
            ("refunded", SettlementOutcome::Refunded),
            ("partially_refunded", SettlementOutcome::Refunded),
            ("charged_back", SettlementOutcome::Refunded),
        ],
        SettlementOutcome::Pending,
    )
}

/// Order body; tax and shipping go in a tax line so the amount equals the total
fn order_body(request: &HandleRequest) -> Result<Value> {
    let mut lines_total = Decimal::ZERO;
    let line_items = request
        .items
        .iter()
        .map(|line| -> Result<Value> {
            lines_total += line.unit_price * Decimal::from(line.quantity);
            Ok(json!({
                "name": line.title(),
                "sku": line.variant_id.clone().unwrap_or_else(|| line.product_id.clone()),
                "unit_price": to_minor_units(line.unit_price)?,
                "quantity": line.quantity,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut body = json!({
        "currency": request.currency.to_uppercase(),
        "line_items": line_items,
        "metadata": { "order_number": request.order_number },
        "checkout": {
            "type": "HostedPayment",
            "allowed_payment_methods": ["card", "cash", "bank_transfer"],
            "success_url": request.return_urls.success,
            "failure_url": request.return_urls.failure,
        },
    });

    let extra = request.total - lines_total;
    if extra > Decimal::ZERO {
        body["tax_lines"] = json!([{ "description": "IVA y envío", "amount": to_minor_units(extra)? }]);
    } else if extra < Decimal::ZERO {
        body["discount_lines"] = json!([{
            "code": "DESCUENTO",
            "type": "coupon",
            "amount": to_minor_units(-extra)?,
        }]);
    }

    if let Some(email) = &request.customer_email {
        body["customer_info"] = json!({ "name": email, "email": email, "phone": "0000000000" });
    }
    Ok(body)
}

fn snapshot(order: &Value) -> Result<PaymentSnapshot> {
    let reference = id_field(&order["id"])
        .ok_or_else(|| PaymentError::gateway_with_payload(Provider::Conekta, "order without id", order.clone()))?;
    let status = order["payment_status"]
        .as_str()
        .ok_or_else(|| PaymentError::gateway_with_payload(Provider::Conekta, "order without payment_status", order.clone()))?
        .to_string();

    Ok(PaymentSnapshot {
        provider: Provider::Conekta,
        reference,
        status,
        amount: order["amount"].as_i64().map(from_minor_units),
        order_number: order["metadata"]["order_number"].as_str().map(str::to_string),
        items: Vec::new(),
        raw: order.clone(),
    })
}

/// Verify the `digest` header (hex HMAC-SHA256 of the body) and parse
fn parse_webhook(payload: &str, headers: &HeaderMap, secret: Option<&str>) -> Result<WebhookEvent> {
    let secret =
        secret.ok_or_else(|| PaymentError::Signature("Conekta webhook secret not configured".into()))?;
    let digest = header_str(headers, "digest")
        .ok_or_else(|| PaymentError::Signature("missing digest header".into()))?;
    signature::verify_hex(secret, payload.as_bytes(), digest)?;

    let raw = parse_body(payload)?;
    let event_type = raw["type"].as_str().unwrap_or_default().to_string();
    let object = &raw["data"]["object"];

    let (reference, snapshot) = if event_type.starts_with("order.") {
        let snapshot = snapshot(object)?;
        (Some(snapshot.reference.clone()), Some(snapshot))
    } else if event_type.starts_with("charge.") {
        (id_field(&object["order_id"]), None)
    } else {
        (None, None)
    };

    Ok(WebhookEvent {
        provider: Provider::Conekta,
        event_type,
        reference,
        snapshot,
        raw,
    })
}

#[async_trait]
impl PaymentGateway for ConektaGateway {
    fn provider(&self) -> Provider {
        Provider::Conekta
    }

    fn status_table(&self) -> &StatusTable {
        &self.table
    }

    async fn create_payment_handle(&self, request: &HandleRequest) -> Result<PaymentHandle> {
        let body = order_body(request)?;
        let response = self
            .request(reqwest::Method::POST, "/orders")
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(Provider::Conekta, &e))?;
        let order = read_json(Provider::Conekta, response).await?;

        let handle_id = id_field(&order["id"]).ok_or_else(|| {
            PaymentError::gateway_with_payload(Provider::Conekta, "order without id", order.clone())
        })?;
        let checkout_url = order["checkout"]["url"].as_str().map(str::to_string);

        tracing::info!(
            conekta_order = %handle_id,
            order_number = %request.order_number,
            "Created Conekta order"
        );

        Ok(PaymentHandle {
            provider: Provider::Conekta,
            handle_id,
            checkout_url,
            client_secret: None,
        })
    }

    async fn query_status(&self, reference: &str) -> Result<PaymentSnapshot> {
        let order = self.get_order(reference).await?;
        snapshot(&order)
    }

    async fn capture_or_confirm(&self, reference: &str) -> Result<PaymentSnapshot> {
        let order = self.get_order(reference).await?;
        if order["payment_status"].as_str() != Some("pre_authorized") {
            return snapshot(&order);
        }

        let response = self
            .request(reqwest::Method::POST, &format!("/orders/{reference}/capture"))
            .send()
            .await
            .map_err(|e| send_error(Provider::Conekta, &e))?;
        let captured = read_json(Provider::Conekta, response).await?;
        tracing::info!(conekta_order = %reference, "Captured Conekta order");
        snapshot(&captured)
    }

    async fn verify_webhook(&self, payload: &str, headers: &HeaderMap) -> Result<WebhookEvent> {
        parse_webhook(payload, headers, self.config.webhook_secret.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{HandleLine, ReturnUrls};
    use reqwest::header::HeaderValue;
    use rust_decimal_macros::dec;

    const SECRET: &str = "conekta_secret";

    #[test]
    fn test_order_body_uses_minor_units() {
        let request = HandleRequest {
            order_number: "FT-1".into(),
            items: vec![HandleLine {
                product_id: "P1".into(),
                variant_id: None,
                name: None,
                quantity: 2,
                unit_price: dec!(100),
            }],
            total: dec!(232),
            currency: "mxn".into(),
            return_urls: ReturnUrls::for_site("https://shop.example", Provider::Conekta, "FT-1"),
            customer_email: None,
        };
        let body = order_body(&request).unwrap();
        assert_eq!(body["line_items"][0]["unit_price"], 10000);
        assert_eq!(body["tax_lines"][0]["amount"], 3200);
        assert_eq!(body["currency"], "MXN");
    }

    #[test]
    fn test_fractional_cent_never_forwarded() {
        let request = HandleRequest {
            order_number: "FT-2".into(),
            items: vec![HandleLine {
                product_id: "P1".into(),
                variant_id: None,
                name: None,
                quantity: 1,
                unit_price: dec!(10.005),
            }],
            total: dec!(10.005),
            currency: "MXN".into(),
            return_urls: ReturnUrls::for_site("https://shop.example", Provider::Conekta, "FT-2"),
            customer_email: None,
        };
        assert!(matches!(order_body(&request), Err(PaymentError::Amount(_))));
    }

    #[test]
    fn test_order_paid_webhook() {
        let payload = json!({
            "type": "order.paid",
            "data": { "object": {
                "id": "ord_1",
                "payment_status": "paid",
                "amount": 23200,
                "metadata": { "order_number": "FT-1" }
            }}
        })
        .to_string();
        let digest = signature::sign_hex(SECRET, payload.as_bytes()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("digest", HeaderValue::from_str(&digest).unwrap());

        let event = parse_webhook(&payload, &headers, Some(SECRET)).unwrap();
        let snapshot = event.snapshot.unwrap();
        assert_eq!(snapshot.reference, "ord_1");
        assert_eq!(snapshot.amount, Some(dec!(232)));
        assert_eq!(status_table().unwrap().resolve(&snapshot.status), SettlementOutcome::Approved);

        let err = parse_webhook(&payload, &headers, Some("wrong")).unwrap_err();
        assert!(matches!(err, PaymentError::Signature(_)));
    }
}
