//! Order lifecycle endpoints

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use commerce_core::{NewOrder, OrderFilter, OrderStatus};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiJson, order_view, parse_order_id};
use crate::auth::OptionalUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default, rename = "orderId", alias = "order_id")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(default, rename = "orderId", alias = "order_id")]
    pub order_id: Option<String>,
    #[serde(default, rename = "statusId", alias = "status_id")]
    pub status_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub id: Option<String>,
    /// Order number, e.g. from a checkout return URL
    pub number: Option<String>,
    /// Catalog id or name
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

/// `POST /orders/create`
pub async fn create_order(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    ApiJson(mut draft): ApiJson<NewOrder>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if user.is_some() {
        draft.user_id = user;
    }
    let order = state.orders.create_pending_order(draft).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "id": order.id,
            "order_number": order.order_number,
            "total": order.total,
            "message": "Order created",
        })),
    ))
}

/// `POST /orders/cancel`
pub async fn cancel_order(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CancelOrderRequest>,
) -> ApiResult<Json<Value>> {
    let id = parse_order_id(request.order_id.as_deref())?;
    let order = state.orders.cancel(id, request.reason).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order cancelled",
        "order": {
            "id": order.id,
            "order_number": order.order_number,
            "payment_status": order.payment_status,
        },
    })))
}

/// `POST /orders/update-status`
pub async fn update_order_status(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<UpdateStatusRequest>,
) -> ApiResult<Json<Value>> {
    let id = parse_order_id(request.order_id.as_deref())?;
    let status_id = request
        .status_id
        .ok_or_else(|| ApiError::BadRequest("statusId is required".into()))?;
    let target = OrderStatus::from_id(status_id)
        .ok_or_else(|| commerce_core::CoreError::NotFound(format!("status {status_id}")))?;

    let order = state.orders.transition_status(id, target).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Order status updated to {}", target.catalog_name()),
        "order": order_view(&order)?,
    })))
}

/// `GET /orders`: one order when `id` or `number` is given, otherwise a filtered list
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> ApiResult<Json<Value>> {
    if let Some(raw) = query.id.as_deref() {
        let id = parse_order_id(Some(raw))?;
        let order = state.orders.get(id).await?;
        return Ok(Json(json!({ "success": true, "order": order_view(&order)? })));
    }
    if let Some(number) = query.number.as_deref() {
        let order = state.orders.find_by_number(number.trim()).await?;
        return Ok(Json(json!({ "success": true, "order": order_view(&order)? })));
    }

    let status = query
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<i64>()
                .ok()
                .and_then(OrderStatus::from_id)
                .or_else(|| OrderStatus::from_name(raw))
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status {raw}")))
        })
        .transpose()?;

    let filter = OrderFilter {
        status,
        user_id: query.user_id,
        limit: query.limit,
    };
    let orders = state
        .orders
        .list(&filter)
        .await?
        .iter()
        .map(order_view)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(json!({
        "success": true,
        "count": orders.len(),
        "orders": orders,
    })))
}

/// `GET /orders/statuses`
pub async fn list_statuses(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let statuses = state.orders.statuses().await?;
    Ok(Json(json!({ "success": true, "statuses": statuses })))
}
