//! Stock endpoints

use axum::{Json, extract::State};
use commerce_core::StockLine;
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiJson;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub items: Vec<StockLine>,
}

/// `POST /inventory/update`: debit every line and hide sold-out SKUs
pub async fn update_inventory(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<StockRequest>,
) -> ApiResult<Json<Value>> {
    let levels = state.ledger.apply_debits(&state.pool, &request.items).await?;
    Ok(Json(json!({ "success": true, "items": levels })))
}

/// `POST /inventory/check`: report availability without debiting
pub async fn check_inventory(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<StockRequest>,
) -> ApiResult<Json<Value>> {
    let report = state
        .ledger
        .check_availability(&state.pool, &request.items)
        .await?;
    let available = report.iter().all(|line| line.sufficient);

    Ok(Json(json!({
        "success": true,
        "available": available,
        "items": report,
    })))
}
