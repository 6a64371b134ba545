//! Checkout, confirmation, capture and webhook endpoints
//!
//! Every path ends in [`SettlementCoordinator::settle`] keyed by the
//! gateway reference, so a client confirmation and a webhook for the same
//! payment settle it once.
//!
//! [`SettlementCoordinator::settle`]: commerce_core::SettlementCoordinator::settle

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use commerce_core::{
    EventSource, NewOrder, NewOrderItem, OrderLocator, PaymentEvent, PaymentStatus,
    SettlementReport, model::DeclaredTotals,
};
use commerce_payments::{HandleLine, HandleRequest, PaymentGateway, PaymentSnapshot, ReturnUrls};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{ApiJson, order_view};
use crate::auth::OptionalUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    pub order_number: Option<String>,
    pub items: Vec<NewOrderItem>,
    #[serde(default)]
    pub shipping_cost: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(flatten)]
    pub declared: DeclaredTotals,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    /// Gateway reference returned by `create`
    #[serde(default, alias = "paymentId", alias = "reference")]
    pub payment_id: Option<String>,
    #[serde(default, alias = "orderId")]
    pub order_id: Option<Uuid>,
}

/// `POST /payments/{provider}/create`: pending order plus provider handle
pub async fn create_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    OptionalUser(user): OptionalUser,
    ApiJson(request): ApiJson<CreatePaymentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let gateway = state.gateways.resolve(&provider)?;
    let provider = gateway.provider();

    let order = state
        .orders
        .create_pending_order(NewOrder {
            order_number: request.order_number,
            user_id: user,
            items: request.items,
            shipping_cost: request.shipping_cost,
            discount: request.discount,
            declared: request.declared,
            payment_method: provider.to_string(),
            shipping_method: request.shipping_method,
        })
        .await?;

    let handle_request = HandleRequest {
        order_number: order.order_number.clone(),
        items: order
            .items
            .iter()
            .map(|item| HandleLine {
                product_id: item.product_id.clone(),
                variant_id: item.variant_id.clone(),
                name: None,
                quantity: item.quantity,
                unit_price: item.price,
            })
            .collect(),
        total: order.total,
        currency: state.config.currency.clone(),
        return_urls: ReturnUrls::for_site(
            &state.config.public_site_url,
            provider,
            &order.order_number,
        ),
        customer_email: request.customer_email,
    };

    let handle = gateway
        .create_payment_handle(&handle_request)
        .await
        .inspect_err(|e| {
            // The order stays Pending/unpaid; nothing was debited
            tracing::warn!(
                order_number = %order.order_number,
                %provider,
                error = %e,
                "Payment handle creation failed"
            );
        })?;

    tracing::info!(
        order_number = %order.order_number,
        %provider,
        reference = %handle.handle_id,
        "Checkout started"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "order_id": order.id,
            "order_number": order.order_number,
            "total": order.total,
            "provider": provider,
            "payment_id": handle.handle_id,
            "checkout_url": handle.checkout_url,
            "client_secret": handle.client_secret,
        })),
    ))
}

/// `POST /payments/{provider}/confirm`: settle from the provider's current view
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    OptionalUser(user): OptionalUser,
    ApiJson(request): ApiJson<ConfirmPaymentRequest>,
) -> ApiResult<Json<Value>> {
    let gateway = state.gateways.resolve(&provider)?;
    let reference = required_reference(request.payment_id.as_deref())?;
    let snapshot = gateway.query_status(reference).await?;

    let report = settle_client_event(
        &state,
        gateway.as_ref(),
        snapshot,
        request.order_id,
        user,
        EventSource::ClientConfirm,
    )
    .await?;
    settlement_response(&report)
}

/// `POST /payments/{provider}/capture`: capture an authorized payment, then settle
pub async fn capture_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    OptionalUser(user): OptionalUser,
    ApiJson(request): ApiJson<ConfirmPaymentRequest>,
) -> ApiResult<Json<Value>> {
    let gateway = state.gateways.resolve(&provider)?;
    let reference = required_reference(request.payment_id.as_deref())?;
    let snapshot = gateway.capture_or_confirm(reference).await?;

    let report = settle_client_event(
        &state,
        gateway.as_ref(),
        snapshot,
        request.order_id,
        user,
        EventSource::Capture,
    )
    .await?;
    settlement_response(&report)
}

/// `POST /payments/{provider}/webhook`: verify, resolve, settle
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let gateway = state.gateways.resolve(&provider)?;
    let event = gateway.verify_webhook(&body, &headers).await?;

    let Some(reference) = event.reference.as_deref() else {
        tracing::debug!(
            provider = %gateway.provider(),
            event_type = %event.event_type,
            "Ignoring webhook event"
        );
        return Ok(Json(ignored()));
    };

    let inline = event.snapshot.is_some();
    let snapshot = match event.snapshot {
        Some(snapshot) => snapshot,
        None => gateway.query_status(reference).await?,
    };

    // Inline objects (a refunded Stripe charge) may not carry the order number
    let order_number = match snapshot.order_number.clone() {
        Some(number) => Some(number),
        None if inline => gateway.query_status(reference).await?.order_number,
        None => None,
    };
    let Some(order_number) = order_number else {
        tracing::warn!(
            provider = %gateway.provider(),
            %reference,
            "Webhook payment does not name an order"
        );
        return Ok(Json(ignored()));
    };

    let event = payment_event(
        &snapshot,
        OrderLocator::Number(order_number),
        None,
        EventSource::Webhook,
    );
    let report = state.settlement.settle(gateway.status_table(), &event).await?;
    settlement_response(&report)
}

fn required_reference(raw: Option<&str>) -> ApiResult<&str> {
    raw.map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::BadRequest("payment_id is required".into()))
}

/// Settle a snapshot fetched on behalf of the shopper.
///
/// An explicit order id must belong to the payment the provider reports.
async fn settle_client_event(
    state: &AppState,
    gateway: &dyn PaymentGateway,
    snapshot: PaymentSnapshot,
    order_id: Option<Uuid>,
    user_id: Option<String>,
    source: EventSource,
) -> ApiResult<SettlementReport> {
    let locator = match (order_id, snapshot.order_number.as_deref()) {
        (Some(id), reported) => {
            if let Some(reported) = reported {
                let order = state.orders.get(id).await?;
                if order.order_number != reported {
                    return Err(ApiError::BadRequest(format!(
                        "payment {} belongs to another order",
                        snapshot.reference
                    )));
                }
            }
            OrderLocator::Id(id)
        }
        (None, Some(number)) => OrderLocator::Number(number.to_string()),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "orderId is required for this payment".into(),
            ));
        }
    };

    let event = payment_event(&snapshot, locator, user_id, source);
    Ok(state.settlement.settle(gateway.status_table(), &event).await?)
}

fn payment_event(
    snapshot: &PaymentSnapshot,
    locator: OrderLocator,
    user_id: Option<String>,
    source: EventSource,
) -> PaymentEvent {
    let mut event = PaymentEvent::new(
        snapshot.provider.as_str(),
        snapshot.reference.clone(),
        locator,
        snapshot.status.clone(),
        source,
    );
    event.items = snapshot
        .items
        .iter()
        .map(|line| NewOrderItem {
            product_id: line.product_id.clone(),
            variant_id: line.variant_id.clone(),
            quantity: line.quantity,
            price: None,
        })
        .collect();
    event.amount = snapshot.amount;
    event.raw = snapshot.raw.clone();
    event.user_id = user_id;
    event
}

fn settlement_response(report: &SettlementReport) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "success": true,
        "outcome": report.outcome,
        "disposition": report.disposition,
        "paid": report.order.payment_status == PaymentStatus::Paid,
        "transaction_id": report.transaction_id,
        "order": order_view(&report.order)?,
    })))
}

fn ignored() -> Value {
    json!({ "success": true, "received": true, "processed": false })
}
