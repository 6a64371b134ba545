//! HTTP Handlers

mod inventory;
mod orders;
mod payments;
mod transactions;

pub use inventory::{check_inventory, update_inventory};
pub use orders::{cancel_order, create_order, list_orders, list_statuses, update_order_status};
pub use payments::{capture_payment, confirm_payment, create_payment, payment_webhook};
pub use transactions::{create_transaction, list_transactions};

use axum::{Json, extract::FromRequest, extract::State};
use commerce_core::Order;
use commerce_payments::Provider;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// JSON body extractor whose rejections use the API error body
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub providers: Vec<Provider>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.pool.acquire().await.is_ok();

    Json(HealthResponse {
        status: if database { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        providers: state.gateways.providers(),
    })
}

/// Order as returned by the API: `status` is the lowercased catalog name
pub(crate) fn order_view(order: &Order) -> ApiResult<Value> {
    let mut view = serde_json::to_value(order).map_err(|e| ApiError::Internal(e.to_string()))?;
    view["status"] = json!(order.status.display_name());
    view["status_id"] = json!(order.status.id());
    Ok(view)
}

pub(crate) fn parse_order_id(raw: Option<&str>) -> ApiResult<Uuid> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("orderId is required".into()))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("orderId {raw} is not a valid id")))
}
