//! Payment audit endpoints

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use commerce_core::NewTransaction;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiJson, parse_order_id};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub order_id: Option<String>,
}

/// `POST /transactions/create`
pub async fn create_transaction(
    State(state): State<AppState>,
    ApiJson(entry): ApiJson<NewTransaction>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = state.transactions.record(&entry).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
}

/// `GET /transactions?order_id=`
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<Value>> {
    let order_id = parse_order_id(query.order_id.as_deref())?;
    let transactions = state.transactions.for_order(order_id).await?;
    Ok(Json(json!({ "success": true, "transactions": transactions })))
}
